use std::fmt;

/// Where a connection is in its current request/response exchange.
///
/// `Idle` is the initial state and the state between keep-alive exchanges.
/// `Closed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExchangePhase {
    Idle,
    /// The handler runs while the request body is still arriving.
    ReceivingRequestBody,
    /// The handler runs and the request has been received completely.
    HandlerRunning,
    ProducingResponseBody,
    Closed,
}

impl ExchangePhase {
    /// Whether the state machine may move from `self` to `next`. Every phase
    /// may close, nothing leaves `Closed`.
    pub fn can_transition_to(self, next: ExchangePhase) -> bool {
        use ExchangePhase::*;

        match (self, next) {
            (Closed, _) => false,
            (_, Closed) => true,
            // the direct jump to ProducingResponseBody is an error response
            (Idle, ReceivingRequestBody | HandlerRunning | ProducingResponseBody) => true,
            (ReceivingRequestBody, HandlerRunning | ProducingResponseBody) => true,
            (HandlerRunning, ProducingResponseBody) => true,
            (ProducingResponseBody, Idle) => true,
            _ => false,
        }
    }

    pub fn is_closed(self) -> bool {
        self == ExchangePhase::Closed
    }

    /// True while a handler task is outstanding.
    pub fn is_handler_running(self) -> bool {
        matches!(self, ExchangePhase::ReceivingRequestBody | ExchangePhase::HandlerRunning)
    }
}

impl fmt::Display for ExchangePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ExchangePhase::Idle => "idle",
            ExchangePhase::ReceivingRequestBody => "receiving-request-body",
            ExchangePhase::HandlerRunning => "handler-running",
            ExchangePhase::ProducingResponseBody => "producing-response-body",
            ExchangePhase::Closed => "closed",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::ExchangePhase::*;
    use super::*;

    const ALL: [ExchangePhase; 5] = [Idle, ReceivingRequestBody, HandlerRunning, ProducingResponseBody, Closed];

    #[test]
    fn closed_is_terminal() {
        for next in ALL {
            assert!(!Closed.can_transition_to(next));
        }
        for phase in [Idle, ReceivingRequestBody, HandlerRunning, ProducingResponseBody] {
            assert!(phase.can_transition_to(Closed));
        }
    }

    #[test]
    fn normal_exchange_order() {
        assert!(Idle.can_transition_to(ReceivingRequestBody));
        assert!(ReceivingRequestBody.can_transition_to(HandlerRunning));
        assert!(HandlerRunning.can_transition_to(ProducingResponseBody));
        assert!(ProducingResponseBody.can_transition_to(Idle));
    }

    #[test]
    fn no_going_back() {
        assert!(!HandlerRunning.can_transition_to(ReceivingRequestBody));
        assert!(!ProducingResponseBody.can_transition_to(HandlerRunning));
        assert!(!HandlerRunning.can_transition_to(Idle));
        assert!(!ReceivingRequestBody.can_transition_to(Idle));
        assert!(!Idle.can_transition_to(Idle));
    }
}
