pub mod config;
pub mod domain;
pub mod errors;

pub use domain::commerce::{
    Fulfillment, LineItem, OrderRecord, ProductRecord, ProductVariant,
};
pub use domain::conversation::{
    Conversation, ConversationId, ConversationStatus, CustomerRef,
};
pub use domain::message::{Message, MessageMetadata, MessageRole};
pub use domain::store::{BotPersonality, SettingsPatch, StoreProfile, StoreSettings};
pub use errors::{ApplicationError, DomainError, InterfaceError};
