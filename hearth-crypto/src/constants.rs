pub const BASE58_MULTIBASE_PREFIX: &str = "z";
pub const DID_KEY_PREFIX: &str = "did:key:";
/// varint(0x1200): the multicodec code for p256-pub.
pub const P256_DID_PREFIX: [u8; 2] = [0x80, 0x24];
pub const P256_JWT_ALG: &str = "ES256";
