use anyhow::{bail, Context, Result};
use std::fmt;

pub const DEFAULT_SYSTEM_PROMPT: &str = "\
You are a rate my professor agent to help students find classes, that takes in user questions and answers them.
For every user question, the top 3 professors that match the user question are returned.
Use them to answer the question if needed.";

#[derive(Clone)]
pub struct Config {
    pub port: u16,
    pub openai_api_key: String,
    pub openai_base_url: String,
    pub embedding_model: String,
    pub chat_model: String,
    pub pinecone_api_key: String,
    pub pinecone_controller_url: String,
    pub pinecone_index: String,
    pub pinecone_namespace: String,
    pub pinecone_index_host: Option<String>,
    pub top_k: usize,
    pub connect_timeout_secs: u64,
    pub system_prompt: String,
    pub log_level: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from any key lookup. Credentials are mandatory.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let or_default = |key: &str, default: &str| var(key).unwrap_or_else(|| default.to_string());

        let openai_api_key = var("OPENAI_API_KEY").context("OPENAI_API_KEY must be set")?;
        let pinecone_api_key = var("PINECONE_API_KEY").context("PINECONE_API_KEY must be set")?;

        let top_k: usize = or_default("RETRIEVAL_TOP_K", "3")
            .parse()
            .context("RETRIEVAL_TOP_K must be a positive integer")?;
        if top_k == 0 {
            bail!("RETRIEVAL_TOP_K must be a positive integer");
        }

        Ok(Config {
            port: or_default("PORT", "8080")
                .parse()
                .context("PORT must be a valid port number")?,
            openai_api_key,
            openai_base_url: trim_url(or_default("OPENAI_BASE_URL", "https://api.openai.com/v1")),
            embedding_model: or_default("EMBEDDING_MODEL", "text-embedding-3-small"),
            chat_model: or_default("CHAT_MODEL", "gpt-4o-mini"),
            pinecone_api_key,
            pinecone_controller_url: trim_url(or_default(
                "PINECONE_CONTROLLER_URL",
                "https://api.pinecone.io",
            )),
            pinecone_index: or_default("PINECONE_INDEX", "rag"),
            pinecone_namespace: or_default("PINECONE_NAMESPACE", "ns1"),
            pinecone_index_host: var("PINECONE_INDEX_HOST").map(trim_url),
            top_k,
            connect_timeout_secs: or_default("UPSTREAM_CONNECT_TIMEOUT_SECS", "10")
                .parse()
                .context("UPSTREAM_CONNECT_TIMEOUT_SECS must be a number of seconds")?,
            system_prompt: or_default("SYSTEM_PROMPT", DEFAULT_SYSTEM_PROMPT),
            log_level: or_default("LOG_LEVEL", "info"),
        })
    }
}

fn trim_url(url: String) -> String {
    url.trim_end_matches('/').to_string()
}

// Keys stay out of logs.
impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("port", &self.port)
            .field("openai_base_url", &self.openai_base_url)
            .field("embedding_model", &self.embedding_model)
            .field("chat_model", &self.chat_model)
            .field("pinecone_controller_url", &self.pinecone_controller_url)
            .field("pinecone_index", &self.pinecone_index)
            .field("pinecone_namespace", &self.pinecone_namespace)
            .field("pinecone_index_host", &self.pinecone_index_host)
            .field("top_k", &self.top_k)
            .field("connect_timeout_secs", &self.connect_timeout_secs)
            .field("log_level", &self.log_level)
            .finish_non_exhaustive()
    }
}
