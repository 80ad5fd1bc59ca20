pub mod access_token;
pub mod events;
pub mod http;
pub mod instance_template;
pub mod keys;
pub mod listener;
pub mod logger;
pub mod network;
pub mod provider_manager;
pub mod record;
pub mod settings;
pub mod waiter;
pub mod workflow;
