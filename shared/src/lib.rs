//! Wire records shared by the sync server and its clients.
//!
//! Every field of [`PlayerState`] defaults to its zero value, so clients may
//! send partial records and older clients keep working when fields are added.

use serde::{Deserialize, Deserializer, Serialize};

pub mod codec;

pub use codec::CodecError;

/// Query parameter carrying the session key on the upgrade request
pub const SESSION_KEY_PARAM: &str = "sessionKey";
/// Query parameter carrying the client's protocol version
pub const CLIENT_VERSION_PARAM: &str = "clientVersion";
/// Query parameter carrying the display name
pub const DISPLAY_NAME_PARAM: &str = "displayName";

/// Separator placed between snapshots coalesced into one frame
pub const FRAME_DELIMITER: char = '\n';

/// Last known transform and animation state of one player.
///
/// Every field also accepts an explicit JSON `null`, which decodes to the
/// field's zero value exactly like a missing key.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PlayerState {
    #[serde(deserialize_with = "null_as_default")]
    pub x: f64,
    #[serde(deserialize_with = "null_as_default")]
    pub y: f64,
    #[serde(deserialize_with = "null_as_default")]
    pub z: f64,
    /// Facing direction
    #[serde(deserialize_with = "null_as_default")]
    pub fx: f64,
    #[serde(deserialize_with = "null_as_default")]
    pub fy: f64,
    #[serde(deserialize_with = "null_as_default")]
    pub fz: f64,
    #[serde(deserialize_with = "null_as_default")]
    pub display_name: String,
    #[serde(deserialize_with = "null_as_default")]
    pub session_key: String,
    #[serde(deserialize_with = "null_as_default")]
    pub world_state: i64,
    #[serde(deserialize_with = "null_as_default")]
    pub speed: f64,
    #[serde(deserialize_with = "null_as_default")]
    pub vertical_speed: f64,
    #[serde(deserialize_with = "null_as_default")]
    pub angle: f64,
    #[serde(deserialize_with = "null_as_default")]
    pub grounded: bool,
    #[serde(deserialize_with = "null_as_default")]
    pub climbing: bool,
    #[serde(deserialize_with = "null_as_default")]
    pub swimming: bool,
    #[serde(deserialize_with = "null_as_default")]
    pub gliding: bool,
    #[serde(deserialize_with = "null_as_default")]
    pub sledding: bool,
    #[serde(deserialize_with = "null_as_default")]
    pub attack_trigger: bool,
    #[serde(deserialize_with = "null_as_default")]
    pub ragdoll_trigger: bool,
    #[serde(deserialize_with = "null_as_default")]
    pub equipped_state: i64,
    #[serde(deserialize_with = "null_as_default")]
    pub animation_hash: i64,
    #[serde(rename = "hatItemID", deserialize_with = "null_as_default")]
    pub hat_item_id: String,
    #[serde(rename = "leftHandItemID", deserialize_with = "null_as_default")]
    pub left_hand_item_id: String,
    #[serde(rename = "rightHandItemID", deserialize_with = "null_as_default")]
    pub right_hand_item_id: String,
}

/// Decodes `null` as the type's default value
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

impl PlayerState {
    /// Creates a state positioned at the given coordinates
    ///
    /// All other fields keep their zero values.
    pub fn at(x: f64, y: f64, z: f64) -> Self {
        Self {
            x,
            y,
            z,
            ..Self::default()
        }
    }

    /// Current position as an `(x, y, z)` tuple
    pub fn position(&self) -> (f64, f64, f64) {
        (self.x, self.y, self.z)
    }
}

/// Aggregated state of one session, rebuilt on every broadcast tick.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub player_states: Vec<PlayerState>,
    pub server_version: String,
}

impl SessionSnapshot {
    /// Builds a snapshot from entries already in connection order
    pub fn new(player_states: Vec<PlayerState>, server_version: impl Into<String>) -> Self {
        Self {
            player_states,
            server_version: server_version.into(),
        }
    }

    /// Finds the entry published under the given display name
    pub fn find(&self, display_name: &str) -> Option<&PlayerState> {
        self.player_states
            .iter()
            .find(|state| state.display_name == display_name)
    }

    /// Number of players in the session
    pub fn len(&self) -> usize {
        self.player_states.len()
    }

    /// True when the snapshot carries no players
    pub fn is_empty(&self) -> bool {
        self.player_states.is_empty()
    }
}
