//! Human-shareable payment reference codes and the confirmation message
//! the user sends alongside a manual payment.

use rand::{rngs::OsRng, RngCore};
use reqwest::Url;

use crate::models::payment_request::PaymentRequest;

const REFERENCE_PREFIX: &str = "PAY-";

/// Uppercase hex from `n` bytes of OS randomness.
pub fn random_hex(n: usize) -> String {
    let mut bytes = vec![0u8; n];
    OsRng.fill_bytes(&mut bytes);
    hex::encode_upper(bytes)
}

/// `PAY-` followed by 6 uppercase hex characters.
pub fn generate_reference_code() -> String {
    format!("{}{}", REFERENCE_PREFIX, random_hex(3))
}

pub fn is_reference_code(code: &str) -> bool {
    code.strip_prefix(REFERENCE_PREFIX).is_some_and(|rest| {
        rest.len() == 6 && rest.chars().all(|c| c.is_ascii_digit() || ('A'..='F').contains(&c))
    })
}

pub fn confirmation_message(request: &PaymentRequest) -> String {
    let period = if request.period == 1 {
        "1 month".to_string()
    } else {
        format!("{} months", request.period)
    };
    format!(
        "Hello, I have sent my payment for the {} plan ({}).\nReference: {}\nAmount: ${}",
        request.plan.as_str().replace('_', " "),
        period,
        request.reference_code,
        request.amount,
    )
}

/// Click-to-chat link carrying the confirmation message. `None` when no
/// contact number is configured.
pub fn confirmation_link(contact_number: &str, message: &str) -> Option<String> {
    let digits: String = contact_number.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.is_empty() {
        return None;
    }
    let base = format!("https://wa.me/{}", digits);
    Url::parse_with_params(&base, &[("text", message)])
        .ok()
        .map(String::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::payment_request::PaymentStatus;
    use crate::models::user::SubscriptionTier;
    use chrono::Utc;
    use rust_decimal::Decimal;
    use std::collections::HashSet;
    use uuid::Uuid;

    fn request(code: &str) -> PaymentRequest {
        PaymentRequest {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            plan: SubscriptionTier::ProTrader,
            period: 12,
            reference_code: code.into(),
            original_amount: Decimal::from(1188),
            amount: Decimal::new(63000, 2),
            discount_percentage: 55,
            period_discount: 45,
            first_time_discount: 10,
            status: PaymentStatus::Pending,
            created_at: Utc::now(),
            resolved_at: None,
            resolved_by: None,
        }
    }

    #[test]
    fn reference_code_shape() {
        for _ in 0..100 {
            let code = generate_reference_code();
            assert_eq!(code.len(), 10);
            assert!(is_reference_code(&code), "{}", code);
        }
    }

    #[test]
    fn reference_codes_vary() {
        let codes: HashSet<String> = (0..50).map(|_| generate_reference_code()).collect();
        // 16.7M possibilities; 50 draws colliding down to a handful is not plausible
        assert!(codes.len() > 45);
    }

    #[test]
    fn rejects_malformed_codes() {
        assert!(!is_reference_code("PAY-12345"));
        assert!(!is_reference_code("PAY-abcdef"));
        assert!(!is_reference_code("REF-ABCDEF"));
        assert!(!is_reference_code("PAY-ABCDEG"));
        assert!(is_reference_code("PAY-0A9F3C"));
    }

    #[test]
    fn message_mentions_reference_and_amount() {
        let msg = confirmation_message(&request("PAY-0A9F3C"));
        assert!(msg.contains("PAY-0A9F3C"));
        assert!(msg.contains("$630.00"));
        assert!(msg.contains("pro trader"));
        assert!(msg.contains("12 months"));
    }

    #[test]
    fn link_is_url_encoded() {
        let link = confirmation_link("+1 (555) 010-2030", "Reference: PAY-0A9F3C & more").unwrap();
        assert!(link.starts_with("https://wa.me/15550102030?text="));
        assert!(!link.contains(' '));
        assert!(!link.contains("& more"));
    }

    #[test]
    fn no_link_without_contact() {
        assert!(confirmation_link("", "hi").is_none());
    }
}
