pub mod conversion;
pub mod export;
pub mod font;
pub mod scheduler;
