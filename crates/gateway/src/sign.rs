use sha1::{Digest, Sha1};

/// Flitt request signature: SHA-1 hex over the merchant secret followed by
/// every non-empty parameter value, values ordered by parameter name and
/// joined with `|`.
pub fn sign_request<'a, I>(secret: &str, params: I) -> String
where
    I: IntoIterator<Item = (&'a str, String)>,
{
    let mut params: Vec<(&str, String)> = params.into_iter().collect();
    params.sort_by(|a, b| a.0.cmp(b.0));

    let mut pieces = vec![secret.to_string()];
    pieces.extend(params.into_iter().map(|(_, value)| value).filter(|value| !value.is_empty()));

    let mut hasher = Sha1::new();
    hasher.update(pieces.join("|").as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::sign_request;

    fn request_params(order_desc: &str) -> Vec<(&'static str, String)> {
        vec![
            ("order_id", "deal_777_a1b2c3d4".to_string()),
            ("amount", "14360".to_string()),
            ("currency", "GEL".to_string()),
            ("merchant_id", "1396424".to_string()),
            ("order_desc", order_desc.to_string()),
            ("response_url", "https://example.test/payment-callback".to_string()),
            ("server_callback_url", "https://example.test/payment-callback".to_string()),
            ("version", "1.0".to_string()),
        ]
    }

    #[test]
    fn signs_values_sorted_by_param_name() {
        let signature = sign_request("testsecret", request_params("Acme LLC"));
        assert_eq!(signature, "ce33f5998b817cf23ea856e9c0a392f7f81d79b2");
    }

    #[test]
    fn empty_values_are_dropped_from_the_signature_base() {
        let signature = sign_request("testsecret", request_params(""));
        assert_eq!(signature, "ad8fcf5529202e8436dce3ccfa2aafa0cf74dc87");
    }

    #[test]
    fn signature_depends_on_the_secret() {
        let a = sign_request("secret-a", request_params("x"));
        let b = sign_request("secret-b", request_params("x"));
        assert_ne!(a, b);
    }
}
