use prometheus_client::encoding::EncodeLabelSet;
use ratify_cryptography::ed25519::PublicKey;

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct Message {
    pub origin: String,
    pub recipient: String,
}

impl Message {
    pub fn new(origin: &PublicKey, recipient: &PublicKey) -> Self {
        Self {
            origin: origin.to_string(),
            recipient: recipient.to_string(),
        }
    }
}
