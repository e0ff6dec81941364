pub mod client;

pub use client::{RemoteSession, RemoteSessionFactory, RemoteSettings};
