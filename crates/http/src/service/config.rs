use http::StatusCode;

const DEFAULT_BODY_BUFFER_CAPACITY: usize = 8 * 1024;
const DEFAULT_MAX_IN_FLIGHT: usize = 1024;

/// Settings of the connection service layer.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    origin_server: Option<String>,
    error_status: StatusCode,
    body_buffer_capacity: usize,
    max_in_flight: usize,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            origin_server: None,
            error_status: StatusCode::BAD_REQUEST,
            body_buffer_capacity: DEFAULT_BODY_BUFFER_CAPACITY,
            max_in_flight: DEFAULT_MAX_IN_FLIGHT,
        }
    }
}

impl ServiceConfig {
    /// Starts from the defaults.
    pub fn builder() -> ServiceConfigBuilder {
        ServiceConfigBuilder { config: ServiceConfig::default() }
    }

    /// Value of the `Server` response header, if any.
    pub fn origin_server(&self) -> Option<&str> {
        self.origin_server.as_deref()
    }

    /// Status of the error response sent for a malformed request.
    pub fn error_status(&self) -> StatusCode {
        self.error_status
    }

    /// Request body bytes buffered ahead of the handler before input is
    /// suspended.
    pub fn body_buffer_capacity(&self) -> usize {
        self.body_buffer_capacity
    }

    /// Handler tasks allowed to run at the same time, across all connections.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight
    }
}

/// Builder for [`ServiceConfig`].
#[derive(Debug)]
pub struct ServiceConfigBuilder {
    config: ServiceConfig,
}

impl ServiceConfigBuilder {
    /// Value of the `Server` header added to responses that lack one.
    pub fn origin_server(mut self, origin_server: impl Into<String>) -> Self {
        self.config.origin_server = Some(origin_server.into());
        self
    }

    /// Status answered to malformed requests.
    pub fn error_status(mut self, status: StatusCode) -> Self {
        self.config.error_status = status;
        self
    }

    /// Request body bytes buffered per connection before input is suspended.
    pub fn body_buffer_capacity(mut self, capacity: usize) -> Self {
        self.config.body_buffer_capacity = capacity.max(1);
        self
    }

    /// Handler tasks allowed to run at the same time.
    pub fn max_in_flight(mut self, max_in_flight: usize) -> Self {
        self.config.max_in_flight = max_in_flight.max(1);
        self
    }

    pub fn build(self) -> ServiceConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = ServiceConfig::default();
        assert_eq!(config.error_status(), StatusCode::BAD_REQUEST);
        assert_eq!(config.origin_server(), None);
        assert!(config.max_in_flight() > 0);
    }

    #[test]
    fn builder_clamps_zero() {
        let config = ServiceConfig::builder().origin_server("test/1.0").body_buffer_capacity(0).max_in_flight(0).build();
        assert_eq!(config.origin_server(), Some("test/1.0"));
        assert_eq!(config.body_buffer_capacity(), 1);
        assert_eq!(config.max_in_flight(), 1);
    }
}
