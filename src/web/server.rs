use std::net::{IpAddr, SocketAddr};
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use super::api::{api_router, ApiState};

/// Where the JSON API listens
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiServerConfig {
    pub bind: IpAddr,
    pub port: u16,
}

impl ApiServerConfig {
    /// Built from `API_PORT` and `API_BIND`. `None` when no port is set,
    /// which leaves the API disabled.
    pub fn from_env() -> Option<Self> {
        Self::from_values(
            std::env::var("API_PORT").ok().as_deref(),
            std::env::var("API_BIND").ok().as_deref(),
        )
    }

    fn from_values(port: Option<&str>, bind: Option<&str>) -> Option<Self> {
        let port = port?.trim().parse().ok()?;
        let bind = bind
            .and_then(|b| b.trim().parse().ok())
            .unwrap_or(IpAddr::from([0, 0, 0, 0]));
        Some(Self { bind, port })
    }

    pub fn addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind, self.port)
    }
}

pub async fn start_api_server(config: ApiServerConfig, state: ApiState) -> anyhow::Result<()> {
    let app = api_router(state).layer(
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any),
    );

    let addr = config.addr();
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("JSON API listening on http://{}", addr);

    axum::serve(listener, app).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_from_values() {
        assert_eq!(ApiServerConfig::from_values(None, Some("127.0.0.1")), None);
        assert_eq!(ApiServerConfig::from_values(Some("not-a-port"), None), None);

        let config = ApiServerConfig::from_values(Some("8080"), None).unwrap();
        assert_eq!(config.addr().to_string(), "0.0.0.0:8080");

        let config = ApiServerConfig::from_values(Some("9000"), Some("127.0.0.1")).unwrap();
        assert_eq!(config.addr().to_string(), "127.0.0.1:9000");
    }
}
