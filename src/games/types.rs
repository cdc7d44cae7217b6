use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Request identifier assigned by the randomness oracle
pub type RequestId = u64;

/// Native value in wei
pub type Amount = u128;

/// 32 bytes delivered by the oracle callback
pub type Randomness = [u8; 32];

/// One ether in wei
pub const ETHER: Amount = 1_000_000_000_000_000_000;

/// 20-byte account address
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Address(pub [u8; 20]);

impl Address {
    pub const ZERO: Address = Address([0u8; 20]);

    /// Address whose last eight bytes hold `n` (handy for fixtures)
    pub fn from_low_u64(n: u64) -> Self {
        let mut bytes = [0u8; 20];
        bytes[12..].copy_from_slice(&n.to_be_bytes());
        Address(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl FromStr for Address {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits = s.strip_prefix("0x").unwrap_or(s);
        let bytes = hex::decode(digits).map_err(|e| format!("Invalid address hex: {}", e))?;
        let array: [u8; 20] = bytes
            .try_into()
            .map_err(|_| "Address must be 20 bytes".to_string())?;
        Ok(Address(array))
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Coin flip choice
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CoinChoice {
    Heads,
    Tails,
}

impl fmt::Display for CoinChoice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CoinChoice::Heads => write!(f, "heads"),
            CoinChoice::Tails => write!(f, "tails"),
        }
    }
}

impl FromStr for CoinChoice {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "heads" | "h" => Ok(CoinChoice::Heads),
            "tails" | "t" => Ok(CoinChoice::Tails),
            other => Err(format!("Unknown coin side '{}'", other)),
        }
    }
}

/// Game outcome
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum GameOutcome {
    Win,
    Loss,
}

/// Lifecycle of a game request
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum GameStatus {
    Pending,
    Settled,
}

/// Caller-supplied parameters for a flip
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct FlipParams {
    pub prediction: CoinChoice,
    pub wager: Amount,
}

/// A randomness request recorded by the game ledger
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GameRequest {
    pub id: RequestId,
    pub requester: Address,
    pub prediction: CoinChoice,
    pub wager: Amount,
    /// Fee deposited with the oracle for this request
    pub prepaid_fee: Amount,
    pub status: GameStatus,
}

impl GameRequest {
    pub fn is_pending(&self) -> bool {
        self.status == GameStatus::Pending
    }
}

/// Result of applying the delivered randomness to a request
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct Outcome {
    pub result: CoinChoice,
    pub outcome: GameOutcome,
    pub payout: Amount,
}

/// Events emitted by the coin flip game
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum GameEvent {
    /// A flip was requested
    Flip {
        player: Address,
        id: RequestId,
        prediction: CoinChoice,
    },

    /// A flip was settled from the oracle's randomness
    FlipResult {
        player: Address,
        id: RequestId,
        #[serde(with = "hex_bytes32")]
        seed: Randomness,
        prediction: CoinChoice,
        result: CoinChoice,
        outcome: GameOutcome,
        payout: Amount,
    },

    /// Surplus fee of an earlier game paid back to its player
    Refund {
        player: Address,
        amount: Amount,
        refunded_game: RequestId,
    },
}

impl GameEvent {
    pub fn name(&self) -> &'static str {
        match self {
            GameEvent::Flip { .. } => "Flip",
            GameEvent::FlipResult { .. } => "FlipResult",
            GameEvent::Refund { .. } => "Refund",
        }
    }
}

mod hex_bytes32 {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8; 32], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format!("0x{}", hex::encode(bytes)))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<[u8; 32], D::Error> {
        let s = String::deserialize(deserializer)?;
        let bytes = hex::decode(s.strip_prefix("0x").unwrap_or(&s)).map_err(serde::de::Error::custom)?;
        bytes
            .try_into()
            .map_err(|_| serde::de::Error::custom("expected 32 bytes"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_display_and_parse() {
        let addr = Address::from_low_u64(0xabcd);
        let text = addr.to_string();

        assert_eq!(text, "0x000000000000000000000000000000000000abcd");
        assert_eq!(text.parse::<Address>().unwrap(), addr);
    }

    #[test]
    fn test_address_rejects_wrong_length() {
        assert!("0x1234".parse::<Address>().is_err());
    }

    #[test]
    fn test_coin_choice_parse() {
        assert_eq!("HEADS".parse::<CoinChoice>().unwrap(), CoinChoice::Heads);
        assert_eq!("t".parse::<CoinChoice>().unwrap(), CoinChoice::Tails);
        assert!("edge".parse::<CoinChoice>().is_err());
    }

    #[test]
    fn test_event_json_shape() {
        let event = GameEvent::Refund {
            player: Address::from_low_u64(1),
            amount: 7,
            refunded_game: 1,
        };
        let json = serde_json::to_value(&event).unwrap();

        assert_eq!(json["event"], "Refund");
        assert_eq!(json["refunded_game"], 1);
        assert_eq!(event.name(), "Refund");
    }

    #[test]
    fn test_flip_result_seed_is_hex() {
        let event = GameEvent::FlipResult {
            player: Address::from_low_u64(2),
            id: 3,
            seed: [0xff; 32],
            prediction: CoinChoice::Heads,
            result: CoinChoice::Tails,
            outcome: GameOutcome::Loss,
            payout: 0,
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(&format!("0x{}", "ff".repeat(32))));

        let back: GameEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back, event);
    }
}
