// Roster model: the fixed, ordered set of position slots a match is played with.
//
// A roster is built once from a format template and afterwards only changes
// occupancy. Stored rosters carry a schema version; anything older or shaped
// differently goes through `normalize` exactly once.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::CoreError;

pub const ROSTER_SCHEMA_VERSION: u32 = 1;
pub const RESERVE_POSITION: &str = "RES";
pub const MAX_RESERVES: usize = 5;
pub const MAX_PREFERENCES: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Side {
    A,
    B,
}

impl Side {
    pub fn from_str_name(s: &str) -> Option<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "A" | "TEAMA" | "TEAM_A" | "HOME" => Some(Side::A),
            "B" | "TEAMB" | "TEAM_B" | "AWAY" => Some(Side::B),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Side::A => "A",
            Side::B => "B",
        }
    }

    pub fn opposite(self) -> Self {
        match self {
            Side::A => Side::B,
            Side::B => Side::A,
        }
    }
}

/// Match formats with a position template per side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MatchFormat {
    #[serde(rename = "5v5")]
    FiveASide,
    #[serde(rename = "7v7")]
    SevenASide,
    #[serde(rename = "11v11")]
    ElevenASide,
}

impl MatchFormat {
    pub fn from_str_name(s: &str) -> Option<Self> {
        match s {
            "5v5" | "5-a-side" => Some(Self::FiveASide),
            "7v7" | "7-a-side" => Some(Self::SevenASide),
            "11v11" | "11-a-side" => Some(Self::ElevenASide),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::FiveASide => "5v5",
            Self::SevenASide => "7v7",
            Self::ElevenASide => "11v11",
        }
    }

    /// Named positions for one side, in display order.
    pub fn positions(self) -> &'static [&'static str] {
        match self {
            Self::FiveASide => &["GK", "DEF", "LM", "RM", "ST"],
            Self::SevenASide => &["GK", "LB", "CB", "RB", "LM", "RM", "ST"],
            Self::ElevenASide => &[
                "GK", "LB", "LCB", "RCB", "RB", "LM", "LCM", "RCM", "RM", "LST", "RST",
            ],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Slot {
    pub team: Side,
    pub position: String,
    pub occupant: Option<i64>,
}

impl Slot {
    fn new(team: Side, position: &str) -> Self {
        Self {
            team,
            position: position.to_string(),
            occupant: None,
        }
    }

    pub fn is_reserve(&self) -> bool {
        self.position == RESERVE_POSITION
    }
}

/// Where a player ended up after a successful join.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Placement {
    pub position: String,
    pub team: Side,
}

impl From<&Slot> for Placement {
    fn from(slot: &Slot) -> Self {
        Self {
            position: slot.position.clone(),
            team: slot.team,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Roster {
    pub version: u32,
    pub slots: Vec<Slot>,
}

impl Roster {
    /// Build the empty roster for a format: the named positions for side A,
    /// its reserves, then the same for side B.
    pub fn from_template(format: MatchFormat, reserves: usize) -> Self {
        let reserves = reserves.min(MAX_RESERVES);
        let mut slots = Vec::with_capacity((format.positions().len() + reserves) * 2);
        for side in [Side::A, Side::B] {
            slots.extend(format.positions().iter().map(|p| Slot::new(side, p)));
            slots.extend((0..reserves).map(|_| Slot::new(side, RESERVE_POSITION)));
        }
        Self {
            version: ROSTER_SCHEMA_VERSION,
            slots,
        }
    }

    /// Index of the slot the player currently occupies.
    pub fn slot_of(&self, player_id: i64) -> Option<usize> {
        self.slots
            .iter()
            .position(|s| s.occupant == Some(player_id))
    }

    pub fn occupants(&self, side: Side) -> Vec<i64> {
        self.slots
            .iter()
            .filter(|s| s.team == side)
            .filter_map(|s| s.occupant)
            .collect()
    }

    /// Occupants of one side together with the position each one holds.
    pub fn lineup(&self, side: Side) -> Vec<(i64, &str)> {
        self.slots
            .iter()
            .filter(|s| s.team == side)
            .filter_map(|s| s.occupant.map(|p| (p, s.position.as_str())))
            .collect()
    }

    pub fn has_position(&self, position: &str, team: Option<Side>) -> bool {
        self.slots
            .iter()
            .any(|s| s.position == position && team.map_or(true, |t| s.team == t))
    }

    /// First free slot matching the position (and the side, when given).
    pub fn find_free(&self, position: &str, team: Option<Side>) -> Option<usize> {
        self.slots.iter().position(|s| {
            s.occupant.is_none() && s.position == position && team.map_or(true, |t| s.team == t)
        })
    }

    /// Pick a slot for a join request without mutating anything.
    ///
    /// An explicit position must match exactly. Otherwise the ranked
    /// preferences are scanned in order and the first one with any free slot
    /// wins.
    pub fn select_slot(
        &self,
        desired_position: Option<&str>,
        desired_team: Option<Side>,
        preferences: &[String],
    ) -> Result<usize, CoreError> {
        if let Some(raw) = desired_position {
            let position = normalize_position(raw);
            if !self.has_position(&position, desired_team) {
                return Err(CoreError::invalid(format!(
                    "position {position} does not exist in this match"
                )));
            }
            return self
                .find_free(&position, desired_team)
                .ok_or(CoreError::SlotTaken);
        }

        preferences
            .iter()
            .take(MAX_PREFERENCES)
            .find_map(|pref| self.find_free(&normalize_position(pref), desired_team))
            .ok_or(CoreError::NoPreferredSlotOpen)
    }

    /// Put the player into the slot at `idx`. Fails if someone else holds it.
    pub fn place(&mut self, idx: usize, player_id: i64) -> Result<(), CoreError> {
        let slot = self
            .slots
            .get_mut(idx)
            .ok_or_else(|| CoreError::invalid("slot index out of range"))?;
        match slot.occupant {
            Some(current) if current == player_id => Ok(()),
            Some(_) => Err(CoreError::SlotTaken),
            None => {
                slot.occupant = Some(player_id);
                Ok(())
            }
        }
    }

    /// Clear every slot held by the player. Returns how many were cleared.
    pub fn vacate(&mut self, player_id: i64) -> usize {
        let mut cleared = 0;
        for slot in &mut self.slots {
            if slot.occupant == Some(player_id) {
                slot.occupant = None;
                cleared += 1;
            }
        }
        cleared
    }

    /// No player occupies more than one slot.
    pub fn is_consistent(&self) -> bool {
        let mut seen = HashSet::new();
        self.slots
            .iter()
            .filter_map(|s| s.occupant)
            .all(|p| seen.insert(p))
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{\"version\":1,\"slots\":[]}".to_string())
    }

    /// Parse a stored roster. Canonical documents are taken as they are;
    /// anything else goes through `normalize`.
    pub fn parse(raw: &str, format: Option<MatchFormat>) -> Result<Self, CoreError> {
        if let Ok(roster) = serde_json::from_str::<Roster>(raw) {
            if roster.version == ROSTER_SCHEMA_VERSION && roster.is_consistent() {
                return Ok(roster);
            }
        }
        let value: Value = serde_json::from_str(raw)
            .map_err(|e| CoreError::Internal(format!("unreadable roster document: {e}")))?;
        normalize(&value, format)
    }

    /// True when the stored text is already in canonical form.
    pub fn is_canonical(raw: &str) -> bool {
        matches!(
            serde_json::from_str::<Roster>(raw),
            Ok(r) if r.version == ROSTER_SCHEMA_VERSION && r.is_consistent()
        )
    }
}

pub fn normalize_position(raw: &str) -> String {
    let p = raw.trim().to_ascii_uppercase();
    match p.as_str() {
        "" | "RESERVE" | "RESERVES" | "SUB" | "SUBS" | "SUBSTITUTES" | "BENCH" => {
            RESERVE_POSITION.to_string()
        }
        _ => p,
    }
}

// ── Legacy normalization ─────────────────────────────────────────────

const OCCUPANT_KEYS: [&str; 6] = ["occupant", "occupantId", "occupant_id", "playerId", "player_id", "player"];
const POSITION_KEYS: [&str; 2] = ["position", "pos"];
const SIDE_KEYS: [&str; 2] = ["team", "side"];

/// One entry pulled out of a legacy document before sides are settled.
struct LooseSlot {
    team: Option<Side>,
    position: Option<String>,
    occupant: Option<i64>,
}

fn unplaceable(what: impl std::fmt::Display) -> CoreError {
    CoreError::Internal(format!("cannot place roster entry {what}"))
}

fn occupant_from(value: &Value) -> Result<Option<i64>, CoreError> {
    match value {
        Value::Null => Ok(None),
        Value::Number(n) => n.as_i64().map(Some).ok_or_else(|| unplaceable(value)),
        Value::String(s) if s.trim().is_empty() => Ok(None),
        Value::String(s) => s.trim().parse().map(Some).map_err(|_| unplaceable(value)),
        // A nested player record
        Value::Object(map) => match ["id", "playerId", "player_id", "occupantId", "occupant_id", "occupant"]
            .iter()
            .find_map(|k| map.get(*k))
        {
            Some(inner) => occupant_from(inner),
            None => Err(unplaceable(value)),
        },
        _ => Err(unplaceable(value)),
    }
}

fn first_of<'a>(map: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a Value> {
    keys.iter().find_map(|k| map.get(*k)).filter(|v| !v.is_null())
}

fn loose_from(value: &Value, team: Option<Side>, position: Option<&str>) -> Result<LooseSlot, CoreError> {
    let Value::Object(map) = value else {
        return Ok(LooseSlot {
            team,
            position: position.map(normalize_position),
            occupant: occupant_from(value)?,
        });
    };

    if let Some(key) = map.keys().find(|k| {
        let k = k.as_str();
        !OCCUPANT_KEYS.contains(&k) && !POSITION_KEYS.contains(&k) && !SIDE_KEYS.contains(&k)
    }) {
        return Err(unplaceable(format!("with unknown field {key}")));
    }

    let position = match first_of(map, &POSITION_KEYS) {
        None => position.map(normalize_position),
        Some(Value::String(p)) => Some(normalize_position(p)),
        Some(other) => return Err(unplaceable(other)),
    };
    let tagged = match first_of(map, &SIDE_KEYS) {
        None => None,
        Some(Value::String(raw)) => Some(Side::from_str_name(raw).ok_or_else(|| unplaceable(raw))?),
        Some(other) => return Err(unplaceable(other)),
    };
    let occupant = match first_of(map, &OCCUPANT_KEYS) {
        Some(v) => occupant_from(v)?,
        None => None,
    };
    Ok(LooseSlot {
        team: tagged.or(team),
        position,
        occupant,
    })
}

fn push_items(
    out: &mut Vec<LooseSlot>,
    value: &Value,
    team: Option<Side>,
    position: Option<&str>,
) -> Result<(), CoreError> {
    match value {
        Value::Array(items) => {
            for item in items {
                out.push(loose_from(item, team, position)?);
            }
        }
        other => out.push(loose_from(other, team, position)?),
    }
    Ok(())
}

/// `{"GK": 5, "ST": [8, 9], "RES": null}`: keys are positions.
fn push_position_map(out: &mut Vec<LooseSlot>, map: &Map<String, Value>, team: Option<Side>) -> Result<(), CoreError> {
    for (position, value) in map {
        push_items(out, value, team, Some(position))?;
    }
    Ok(())
}

fn collect_loose(value: &Value) -> Result<Vec<LooseSlot>, CoreError> {
    let mut out = Vec::new();
    match value {
        // Two bare lists: side A then side B
        Value::Array(items) if items.len() == 2 && items.iter().all(Value::is_array) => {
            for (side, list) in [Side::A, Side::B].into_iter().zip(items) {
                push_items(&mut out, list, Some(side), None)?;
            }
        }
        Value::Array(items) => {
            for item in items {
                out.push(loose_from(item, None, None)?);
            }
        }
        Value::Object(map) if map.contains_key("slots") => {
            if let Some(key) = map.keys().find(|k| *k != "slots" && *k != "version") {
                return Err(unplaceable(format!("with unknown key {key}")));
            }
            match map.get("slots") {
                Some(Value::Array(items)) => {
                    for item in items {
                        out.push(loose_from(item, None, None)?);
                    }
                }
                Some(other) => return Err(unplaceable(other)),
                None => {}
            }
        }
        Value::Object(map) if !map.keys().any(|k| Side::from_str_name(k).is_some()) => {
            let positions: Map<String, Value> = map
                .iter()
                .filter(|(k, _)| *k != "version")
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect();
            push_position_map(&mut out, &positions, None)?;
        }
        Value::Object(map) => {
            let mut keyed: Vec<(Side, &Value)> = Vec::new();
            let mut reserves: Vec<&Value> = Vec::new();
            for (key, v) in map {
                if let Some(side) = Side::from_str_name(key) {
                    keyed.push((side, v));
                } else if normalize_position(key) == RESERVE_POSITION {
                    reserves.push(v);
                } else if key != "version" {
                    return Err(unplaceable(format!("with unknown key {key}")));
                }
            }
            // Side A before side B for a stable order.
            keyed.sort_by_key(|(side, _)| *side);
            for (side, v) in keyed {
                match v {
                    Value::Null => {}
                    Value::Object(positions) => push_position_map(&mut out, positions, Some(side))?,
                    other => push_items(&mut out, other, Some(side), None)?,
                }
            }
            for v in reserves {
                if !v.is_null() {
                    push_items(&mut out, v, None, Some(RESERVE_POSITION))?;
                }
            }
        }
        other => return Err(unplaceable(other)),
    }
    Ok(out)
}

/// Turn any historical roster encoding into the canonical slot sequence.
///
/// Rules, applied in order:
/// - entries without a side are split in document order, first half to A;
/// - entries without a position become reserves, unless the document is a
///   bare list of occupants and the format is known, in which case they fill
///   the format template in order and overflow becomes extra reserves;
/// - a player found in more than one slot keeps the first one only.
///
/// Anything that cannot be placed into a slot fails the whole document, so a
/// stored roster is never rewritten with fewer occupants than it had. An empty
/// document with a known format becomes that format's template.
///
/// The output of `normalize` is canonical, so normalizing it again is a no-op.
pub fn normalize(value: &Value, format: Option<MatchFormat>) -> Result<Roster, CoreError> {
    let loose = collect_loose(value)?;
    if loose.is_empty() {
        if let Some(fmt) = format {
            return Ok(Roster::from_template(fmt, 0));
        }
    }

    let bare_list = !loose.is_empty()
        && loose.iter().all(|l| l.position.is_none() && l.team.is_none());

    let mut slots: Vec<Slot> = match (bare_list, format) {
        (true, Some(fmt)) => {
            let mut roster = Roster::from_template(fmt, 0);
            let mut overflow_side = Side::A;
            for (i, l) in loose.iter().enumerate() {
                if i < roster.slots.len() {
                    roster.slots[i].occupant = l.occupant;
                } else if l.occupant.is_some() {
                    roster.slots.push(Slot {
                        team: overflow_side,
                        position: RESERVE_POSITION.to_string(),
                        occupant: l.occupant,
                    });
                    overflow_side = overflow_side.opposite();
                }
            }
            roster.slots
        }
        _ => {
            let untagged = loose.iter().filter(|l| l.team.is_none()).count();
            let first_half = (untagged + 1) / 2;
            let mut seen_untagged = 0;
            loose
                .into_iter()
                .map(|l| {
                    let team = l.team.unwrap_or_else(|| {
                        seen_untagged += 1;
                        if seen_untagged <= first_half {
                            Side::A
                        } else {
                            Side::B
                        }
                    });
                    Slot {
                        team,
                        position: l.position.unwrap_or_else(|| RESERVE_POSITION.to_string()),
                        occupant: l.occupant,
                    }
                })
                .collect()
        }
    };

    let mut seen = HashSet::new();
    for slot in &mut slots {
        if let Some(p) = slot.occupant {
            if !seen.insert(p) {
                tracing::warn!(player_id = p, "Dropping duplicate roster occupancy during normalization");
                slot.occupant = None;
            }
        }
    }

    Ok(Roster {
        version: ROSTER_SCHEMA_VERSION,
        slots,
    })
}
