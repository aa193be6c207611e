/// Service layer for identity-service
///
/// - Email service and welcome mail handler (SMTP via lettre)
/// - Kafka event producer and user-created event handler
/// - User registration (user row and outbox messages in one transaction)
/// - Access and ID token issuance
pub mod email;
pub mod kafka_events;
pub mod registration;
pub mod tokens;

pub use email::{EmailService, MailSender, WelcomeMailHandler, WelcomeMailPayload};
pub use kafka_events::{
    EventPublisher, KafkaEventProducer, LogOnlyPublisher, UserCreatedEvent, UserEventsHandler,
};
pub use registration::RegistrationService;
pub use tokens::{TokenService, ACCESS_TOKEN_SET, ID_TOKEN_SET};
