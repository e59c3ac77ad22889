// Shared connection state for the cache/queue store

pub mod redis;

pub use redis::RedisStore;
