//! Service endpoint descriptor.

/// Address of a proxy endpoint, plus whether the session is wrapped in TLS.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceEndpoint {
    /// `host:port` of the proxy listener.
    pub addr: String,
    /// When true, the connection is wrapped in TLS using the process-wide
    /// security context.
    pub ssl_enabled: bool,
}

impl ServiceEndpoint {
    /// Creates a plaintext endpoint.
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            ssl_enabled: false,
        }
    }

    /// Enables TLS for this endpoint.
    #[must_use]
    pub fn with_tls(mut self) -> Self {
        self.ssl_enabled = true;
        self
    }

    /// Host portion of the address, used as the default TLS server name.
    pub fn host(&self) -> &str {
        self.addr
            .rsplit_once(':')
            .map_or(self.addr.as_str(), |(host, _)| host)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_strips_port() {
        assert_eq!(ServiceEndpoint::new("10.2.3.4:5080").host(), "10.2.3.4");
        assert_eq!(ServiceEndpoint::new("proxy.internal:5080").host(), "proxy.internal");
        assert_eq!(ServiceEndpoint::new("no-port").host(), "no-port");
    }

    #[test]
    fn with_tls_sets_flag() {
        let endpoint = ServiceEndpoint::new("proxy:5080").with_tls();
        assert!(endpoint.ssl_enabled);
    }
}
