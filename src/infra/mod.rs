//! Adapters behind the ports in `app::ports`.

pub mod http_client;
pub mod memory;
pub mod rabbitmq;
pub mod stripe;
pub mod supabase;
pub mod supabase_auth;
pub mod supabase_storage;

pub use memory::{MemoryLedger, MemorySink};
pub use rabbitmq::{RabbitMqEndpoint, RabbitMqSink};
pub use stripe::StripeVerifier;
pub use supabase::SupabaseClient;
pub use supabase_auth::{SupabaseAccounts, SupabaseIdentity};
pub use supabase_storage::SupabaseStorage;
