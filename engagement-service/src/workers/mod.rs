mod outbox;

pub use outbox::OutboxWorker;
