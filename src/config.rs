use std::env;

/// Environment-sourced configuration. Every field has a default so the
/// service boots in development without a .env file.
#[derive(Clone, Debug)]
pub struct AppConfig {
    pub openai_api_key: String,
    pub openai_model: String,
    pub database_url: String,
    pub redis_url: String,
    pub app_name: String,
    pub debug: bool,
    pub cors_origins: Vec<String>,
    pub max_file_size_mb: u64,
    pub allowed_extensions: Vec<String>,
    pub rate_limit_per_minute: u32,
    pub daily_token_budget: u64,
    pub server_host: String,
    pub server_port: u16,
}

impl AppConfig {
    pub fn from_env() -> Self {
        let openai_api_key = env::var("OPENAI_API_KEY").unwrap_or_default();
        let openai_model = env::var("OPENAI_MODEL").unwrap_or_else(|_| "gpt-4o".to_string());
        let database_url = env::var("DATABASE_URL")
            .unwrap_or_else(|_| "postgres://localhost:5432/conversa".to_string());
        let redis_url =
            env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379".to_string());
        let app_name = env::var("APP_NAME").unwrap_or_else(|_| "Conversa AI".to_string());
        let debug = env::var("DEBUG").map(|v| parse_bool(&v)).unwrap_or(false);
        let cors_origins = env::var("CORS_ORIGINS")
            .map(|v| parse_list(&v))
            .unwrap_or_else(|_| vec!["http://localhost:3000".to_string()]);
        let max_file_size_mb = env::var("MAX_FILE_SIZE_MB")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(10);
        let allowed_extensions = env::var("ALLOWED_EXTENSIONS")
            .map(|v| parse_list(&v))
            .unwrap_or_else(|_| {
                ["pdf", "docx", "xlsx", "png", "jpg", "jpeg", "webp"]
                    .iter()
                    .map(|ext| ext.to_string())
                    .collect()
            });
        let rate_limit_per_minute = env::var("RATE_LIMIT_PER_MINUTE")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(20);
        let daily_token_budget = env::var("DAILY_TOKEN_BUDGET")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(100_000);
        let server_host = env::var("SERVER_HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
        let server_port = env::var("SERVER_PORT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(3000);

        Self {
            openai_api_key,
            openai_model,
            database_url,
            redis_url,
            app_name,
            debug,
            cors_origins,
            max_file_size_mb,
            allowed_extensions,
            rate_limit_per_minute,
            daily_token_budget,
            server_host,
            server_port,
        }
    }

    pub fn max_file_size_bytes(&self) -> usize {
        self.max_file_size_mb as usize * 1024 * 1024
    }
}

fn parse_bool(value: &str) -> bool {
    value == "1" || value.eq_ignore_ascii_case("true")
}

fn parse_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|item| item.trim().to_string())
        .filter(|item| !item.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::{parse_bool, parse_list};

    #[test]
    fn parses_truthy_flags() {
        assert!(parse_bool("1"));
        assert!(parse_bool("true"));
        assert!(parse_bool("TRUE"));
        assert!(!parse_bool("0"));
        assert!(!parse_bool("no"));
    }

    #[test]
    fn splits_comma_lists_and_trims() {
        assert_eq!(
            parse_list("http://a.example, http://b.example"),
            vec!["http://a.example", "http://b.example"]
        );
        assert_eq!(parse_list("pdf,docx,,xlsx"), vec!["pdf", "docx", "xlsx"]);
    }
}
