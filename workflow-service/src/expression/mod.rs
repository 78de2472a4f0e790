// Expression Module
// `${{ }}` placeholder scanning and interpolation for matrix, secrets and env contexts

pub mod interpolate;

pub use interpolate::{
    interpolate, placeholders, references_secrets, secret_names, Placeholder, Reference,
};
