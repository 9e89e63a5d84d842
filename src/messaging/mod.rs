mod nats;

pub use nats::{MessageHandler, NatsClient, SubscribeOutcome};
