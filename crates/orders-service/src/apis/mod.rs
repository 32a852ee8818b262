//! Request handling logic behind the HTTP routes.

pub mod order;
