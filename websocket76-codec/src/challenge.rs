use byteorder::{BigEndian, ByteOrder};
use rand::Rng;

/// Number of random bytes sent as the body of the client's handshake request.
pub const KEY3_LEN: usize = 8;

/// Length of the challenge digest that concludes the server's handshake response.
pub const CHALLENGE_LEN: usize = 16;

/// The digest the server must echo at the end of its handshake response.
pub type Challenge = [u8; CHALLENGE_LEN];

/// A single `Sec-WebSocket-Key1`/`Sec-WebSocket-Key2` header: a secret number hidden
/// inside an obfuscated header value.
///
/// The header value carries the decimal digits of `number * spaces` interleaved with
/// random punctuation, plus exactly `spaces` space characters. The receiving side
/// recovers the number by stripping everything but the digits and dividing by the
/// number of spaces.
#[derive(Clone, Debug, PartialEq)]
pub struct SecKey {
    number: u32,
    spaces: u32,
    field: String,
}

impl SecKey {
    fn generate<R: Rng>(rng: &mut R) -> Self {
        let spaces = rng.gen_range(1..=12u32);
        let number = rng.gen_range(0..=u32::MAX / spaces);
        let mut field = (number * spaces).to_string();

        for _ in 0..rng.gen_range(1..=12u32) {
            let pos = rng.gen_range(0..=field.len());
            field.insert(pos, random_noise_char(rng));
        }

        // Spaces must not end up at either end of the header value, otherwise HTTP
        // header trimming would change the count.
        for _ in 0..spaces {
            let pos = rng.gen_range(1..field.len());
            field.insert(pos, ' ');
        }

        SecKey { number, spaces, field }
    }

    /// Returns the secret number fed into the challenge digest.
    #[must_use]
    pub fn number(&self) -> u32 {
        self.number
    }

    /// Returns the number of space characters hidden in the header value.
    #[must_use]
    pub fn spaces(&self) -> u32 {
        self.spaces
    }

    /// Returns the obfuscated value sent on the wire.
    #[must_use]
    pub fn field(&self) -> &str {
        &self.field
    }
}

fn random_noise_char<R: Rng>(rng: &mut R) -> char {
    // Printable ASCII, excluding digits and the space character.
    loop {
        let c = rng.gen_range(0x21u8..=0x7e);
        if !c.is_ascii_digit() {
            return c as char;
        }
    }
}

/// The client's freshly generated handshake secrets: two key headers plus the eight
/// random bytes sent as the request body.
#[derive(Clone, Debug, PartialEq)]
pub struct HandshakeKeys {
    key1: SecKey,
    key2: SecKey,
    key3: [u8; KEY3_LEN],
}

impl HandshakeKeys {
    /// Generates a fresh set of handshake keys from the thread-local random source.
    #[must_use]
    pub fn generate() -> Self {
        Self::generate_with(&mut rand::thread_rng())
    }

    /// Generates a fresh set of handshake keys from the given random source.
    pub fn generate_with<R: Rng>(rng: &mut R) -> Self {
        HandshakeKeys {
            key1: SecKey::generate(rng),
            key2: SecKey::generate(rng),
            key3: rng.gen(),
        }
    }

    /// Returns the key sent in the `Sec-WebSocket-Key1` header.
    #[must_use]
    pub fn key1(&self) -> &SecKey {
        &self.key1
    }

    /// Returns the key sent in the `Sec-WebSocket-Key2` header.
    #[must_use]
    pub fn key2(&self) -> &SecKey {
        &self.key2
    }

    /// Returns the eight random bytes sent as the body of the handshake request.
    #[must_use]
    pub fn key3(&self) -> &[u8; KEY3_LEN] {
        &self.key3
    }

    /// Returns the digest the server must send at the end of its handshake response.
    #[must_use]
    pub fn expected_challenge(&self) -> Challenge {
        expected_challenge(self.key1.number, self.key2.number, &self.key3)
    }
}

/// Computes the challenge digest for a pair of key numbers and the key-3 bytes.
///
/// Each number is serialized as a 4-byte big-endian integer; the 16-byte concatenation
/// `key1 || key2 || key3` is hashed with MD5.
#[must_use]
pub fn expected_challenge(number1: u32, number2: u32, key3: &[u8; KEY3_LEN]) -> Challenge {
    let mut input = [0; 16];
    BigEndian::write_u32(&mut input[0..4], number1);
    BigEndian::write_u32(&mut input[4..8], number2);
    input[8..].copy_from_slice(key3);
    md5::compute(input).0
}

/// Returns `true` if the server echoed the expected challenge digest exactly.
///
/// There is no partial-match tolerance: anything other than the full 16 bytes is a
/// failed handshake.
#[must_use]
pub fn verify_challenge(expected: &Challenge, received: &[u8]) -> bool {
    received == expected
}
