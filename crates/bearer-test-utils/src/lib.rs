//! Test fixtures for bearer-token authentication tests.
//!
//! Provides deterministic Ed25519 keypairs, a JWT claims builder, and a
//! mock JWKS authority backed by wiremock. Fixture constructors panic on
//! failure so broken test setup fails loudly.

pub mod authority;
pub mod keypair;
pub mod token;

pub use authority::MockAuthority;
pub use keypair::TestKeypair;
pub use token::TestTokenBuilder;
