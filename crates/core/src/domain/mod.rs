pub mod answer;
pub mod message;
pub mod query;
pub mod search;
