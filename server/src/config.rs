use std::env;

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub prometheus_port: u16,
    pub redis_url: String,
    pub app_key: String,
    pub app_secret: String,
    pub grant_ttl_secs: i64,
}

impl Config {
    pub fn load() -> Self {
        let _ = dotenvy::dotenv();

        let host = env::var("PRPC_HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
        let port = env::var("PRPC_PORT")
            .unwrap_or_else(|_| "8080".to_string())
            .parse()
            .unwrap_or(8080);
        let prometheus_port = env::var("PROMETHEUS_PORT")
            .unwrap_or_else(|_| "9000".to_string())
            .parse()
            .unwrap_or(9000);
        let redis_url =
            env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string());
        let app_key = env::var("PRPC_APP_KEY").unwrap_or_else(|_| "local".to_string());
        let app_secret =
            env::var("PRPC_APP_SECRET").unwrap_or_else(|_| "insecure-dev-secret".to_string());
        let grant_ttl_secs = env::var("PRPC_GRANT_TTL_SECS")
            .unwrap_or_else(|_| "300".to_string())
            .parse()
            .unwrap_or(300);

        Self {
            host,
            port,
            prometheus_port,
            redis_url,
            app_key,
            app_secret,
            grant_ttl_secs,
        }
    }
}
