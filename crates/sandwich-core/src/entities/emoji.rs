//! Emoji entity - custom guild emojis

use serde::{Deserialize, Serialize};

use crate::value_objects::Snowflake;

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Emoji {
    pub id: Snowflake,
    pub guild_id: Option<Snowflake>,
    pub name: String,
    pub roles: Vec<Snowflake>,
    pub user: Option<super::User>,
    pub require_colons: bool,
    pub managed: bool,
    pub animated: bool,
    pub available: bool,
}

impl Emoji {
    /// Message mention form, `<:name:id>` or `<a:name:id>`
    pub fn mention(&self) -> String {
        if self.animated {
            format!("<a:{}:{}>", self.name, self.id)
        } else {
            format!("<:{}:{}>", self.name, self.id)
        }
    }
}
