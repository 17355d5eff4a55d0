#![allow(dead_code)]

pub mod app;
pub mod factory;
pub mod fakes;

pub use app::TestApp;
pub use factory::{Factory, TestAuth};
pub use fakes::{FakeCertificates, FakeGenerator, FakeProxy, Fakes};
