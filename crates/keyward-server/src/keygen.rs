use rand::distributions::Alphanumeric;
use rand::Rng;

/// Draw `length` independent uniform characters from `[A-Za-z0-9]`.
pub fn generate_key(length: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(length)
        .map(char::from)
        .collect()
}

/// Generate a record ID: 32 random hex chars.
pub fn generate_id() -> String {
    let bytes: [u8; 16] = rand::thread_rng().gen();
    hex::encode(bytes)
}
