pub mod health;
pub mod scanner;
