/// Authentication module
///
/// Token codec (JWT issuance and verification), typed claims and password
/// hashing. Nothing in here touches storage.

mod claims;
mod jwt;
mod password;

pub use claims::{Claims, Subject, TokenKind};
pub use jwt::{InvalidToken, IssuedToken, TokenCodec};
pub use password::{
    hash_password, hash_with_cost, validate_password_strength, verify_against_dummy,
    verify_password,
};
