//! HMAC-SHA256 webhook signatures.

use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::error::{PaymentError, Result};
use crate::webhook::WebhookEvent;

type HmacSha256 = Hmac<Sha256>;

/// Signs and verifies webhook payloads with the secret shared with the PSP.
///
/// The signature is the hex-encoded HMAC-SHA256 of
/// `event_id|payment_id|order_id|status|amount|currency`. Events whose text
/// fields contain `|` never verify.
#[derive(Clone)]
pub struct WebhookSigner {
    keyed: HmacSha256,
}

impl WebhookSigner {
    pub fn new(secret: impl AsRef<[u8]>) -> Result<Self> {
        let secret = secret.as_ref();
        if secret.is_empty() {
            return Err(PaymentError::Validation(
                "webhook secret must not be empty".into(),
            ));
        }
        let keyed = HmacSha256::new_from_slice(secret)
            .map_err(|_| PaymentError::Validation("unusable webhook secret".into()))?;
        Ok(Self { keyed })
    }

    fn mac(&self, event: &WebhookEvent) -> HmacSha256 {
        let mut mac = self.keyed.clone();
        mac.update(event.signing_payload().as_bytes());
        mac
    }

    pub fn sign(&self, event: &WebhookEvent) -> String {
        hex::encode(self.mac(event).finalize().into_bytes())
    }

    /// Constant-time comparison against the event's `signature` field.
    pub fn verify(&self, event: &WebhookEvent) -> bool {
        if event.has_separator_in_fields() {
            return false;
        }
        let Ok(signature) = hex::decode(event.signature.trim()) else {
            return false;
        };
        self.mac(event).verify_slice(&signature).is_ok()
    }
}

impl std::fmt::Debug for WebhookSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebhookSigner").finish_non_exhaustive()
    }
}
