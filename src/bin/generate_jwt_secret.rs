use base64::{engine::general_purpose::STANDARD, Engine as _};
use rand::RngCore;

fn main() {
    println!("JWT Secret Key Generator");
    println!("========================");

    // 256-bit key from the OS-seeded CSPRNG
    let mut key = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut key);

    let base64_key = STANDARD.encode(key);
    let hex_key = hex::encode(key);

    println!();
    println!("Generated JWT secret key:");
    println!("Base64: {}", base64_key);
    println!("Hex:    {}", hex_key);
    println!();
    println!("Add this line to your .env file:");
    println!("JWT_SECRET={}", base64_key);
}
