use crate::{
    token::{CUSTOMER_QR, ProofOfPresenceToken},
    validation::TokenSigner,
};

/// Pure validation of a presented token without database dependencies
///
/// # Arguments
/// * `signer` - Holder of the server key
/// * `token` - Token as reassembled from the stamp request
/// * `now` - Current time, unix seconds
///
/// # Returns
/// * `Ok(())` - Token is authentic and not yet expired
/// * `Err(String)` - Error message if validation fails
pub fn validate_token_pure<S: TokenSigner>(
    signer: &S,
    token: &ProofOfPresenceToken,
    now: i64,
) -> Result<(), String> {
    if token.kind != CUSTOMER_QR {
        return Err("Unsupported token type".to_string());
    }

    // Decode signature
    let sig = hex::decode(&token.sig)
        .map_err(|_| "Invalid sig parameter")?;

    // Verify signature over the canonical message
    match signer.verify(token.signing_message().as_bytes(), &sig) {
        Ok(true) => {}
        Ok(false) => return Err("Invalid signature - token authentication failed".to_string()),
        Err(_) => return Err("Signature verification error".to_string()),
    }

    if now >= token.exp {
        return Err("Token expired".to_string());
    }

    Ok(())
}
