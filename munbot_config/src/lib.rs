mod schema;

pub use schema::{
    Config, GeminiConfig, PreambleConfig, PreambleLocation, ProvidersConfig, mask_key,
};
