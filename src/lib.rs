pub mod atlas;
pub mod tracking;
pub mod vocabulary;
