//! Fleet state: the `{command, turtles}` value the Controller owns and the
//! gateway mirrors.
//!
//! Every [`TurtleState`] attribute is three-valued: unset (the field is
//! simply absent from a partial update), or one of a closed set of explicit
//! values. We model "unset" as `Option::None` and let a merge/diff step
//! decide what an explicit JSON `null` means (see [`crate::patch`]).

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// The closed set of refbox-style directives the Controller understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Command {
	DroppedBall,
	Start,
	Stop,
	GoIn,
	GoOut,
	KickOffMagenta,
	KickOffCyan,
	FreeKickMagenta,
	FreeKickCyan,
	GoalKickMagenta,
	GoalKickCyan,
	ThrowInMagenta,
	ThrowInCyan,
	CornerMagenta,
	CornerCyan,
	PenaltyMagenta,
	PenaltyCyan,
	RoleAssignerOn,
	RoleAssignerOff,
	PassDemo,
	PenaltyDemo,
	BallHandlingDemo,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BallFound {
	Yes,
	Communicated,
	No,
}

/// Wire values are the original's own constants (`off`/`compass_issue`/`on`),
/// kept verbatim rather than derived from the Rust variant names — they are
/// part of the interop contract, not an implementation detail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LocalizationStatus {
	#[serde(rename = "on")]
	Localization,
	#[serde(rename = "off")]
	NoLocalization,
	#[serde(rename = "compass_issue")]
	CompassError,
}

/// Current ball possessor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Cpb {
	Yes,
	Team,
	No,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
	None,
	Inactive,
	Goalkeeper,
	AttackerMain,
	AttackerAssist,
	DefenderMain,
	DefenderAssist,
	DefenderAssist2,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HomeGoal {
	Yellow,
	Blue,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TeamColor {
	Magenta,
	Cyan,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KinectState {
	Ball,
	NoBall,
	NoState,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CapacitorState {
	NoState,
	Empty,
	Full,
}

/// Per-turtle telemetry and control attributes. Every field is optional;
/// `None` means "unset", matching the wire semantics of an absent JSON key.
///
/// Wire keys are the original's own JSON tags (`original_source/commands.go`),
/// not a mechanical snake-case of the Rust field name: most are concatenated
/// with no separator (`batteryvoltage`, `robotinfield`, `kinect1state`, …),
/// while `temperature_m1`/`_m2`/`_m3`, `is_active` and `cam_status` keep their
/// underscores, exactly as the original does.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TurtleState {
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub vision: Option<bool>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub motion: Option<bool>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub worldmodel: Option<bool>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub appman: Option<bool>,
	#[serde(default, skip_serializing_if = "Option::is_none", rename = "robotinfield")]
	pub robot_in_field: Option<bool>,
	#[serde(default, skip_serializing_if = "Option::is_none", rename = "robotembutton")]
	pub emergency_button: Option<bool>,

	#[serde(default, skip_serializing_if = "Option::is_none", rename = "restartcountmotion")]
	pub restart_count_motion: Option<u8>,
	#[serde(default, skip_serializing_if = "Option::is_none", rename = "restartcountvision")]
	pub restart_count_vision: Option<u8>,
	#[serde(
		default,
		skip_serializing_if = "Option::is_none",
		rename = "restartcountworldmodel"
	)]
	pub restart_count_worldmodel: Option<u8>,

	#[serde(default, skip_serializing_if = "Option::is_none", rename = "ballfound")]
	pub ball_found: Option<BallFound>,
	#[serde(default, skip_serializing_if = "Option::is_none", rename = "localizationstatus")]
	pub localization_status: Option<LocalizationStatus>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub cpb: Option<Cpb>,

	#[serde(default, skip_serializing_if = "Option::is_none", rename = "batteryvoltage")]
	pub battery_voltage: Option<u8>,
	#[serde(default, skip_serializing_if = "Option::is_none", rename = "emergencystatus")]
	pub emergency_status: Option<u8>,

	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub role: Option<Role>,
	#[serde(default, skip_serializing_if = "Option::is_none", rename = "refboxrole")]
	pub refbox_role: Option<Role>,

	#[serde(default, skip_serializing_if = "Option::is_none", rename = "homegoal")]
	pub home_goal: Option<HomeGoal>,
	#[serde(default, skip_serializing_if = "Option::is_none", rename = "teamcolor")]
	pub team_color: Option<TeamColor>,

	#[serde(default, skip_serializing_if = "Option::is_none", rename = "activedevpc")]
	pub active_dev_pc: Option<u8>,

	#[serde(default, skip_serializing_if = "Option::is_none", rename = "kinect1state")]
	pub kinect1_state: Option<KinectState>,
	#[serde(default, skip_serializing_if = "Option::is_none", rename = "kinect2state")]
	pub kinect2_state: Option<KinectState>,

	// Ambient telemetry recovered from the original implementation (see
	// SPEC_FULL.md §3); not called out by name in the distilled spec but not
	// excluded by any Non-goal either.
	#[serde(default, skip_serializing_if = "Option::is_none", rename = "commstatus")]
	pub comm_status: Option<bool>,
	#[serde(default, skip_serializing_if = "Option::is_none", rename = "sofsvnrev")]
	pub software_svn_rev: Option<u32>,
	#[serde(default, skip_serializing_if = "Option::is_none", rename = "libsvnrev")]
	pub lib_svn_rev: Option<u32>,
	#[serde(default, skip_serializing_if = "Option::is_none", rename = "cpu0load")]
	pub cpu0_load: Option<u8>,
	#[serde(default, skip_serializing_if = "Option::is_none", rename = "cpu1load")]
	pub cpu1_load: Option<u8>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub temperature_m1: Option<u8>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub temperature_m2: Option<u8>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub temperature_m3: Option<u8>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub is_active: Option<bool>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub cam_status: Option<u8>,
	#[serde(default, skip_serializing_if = "Option::is_none", rename = "capacitorstate")]
	pub capacitor_state: Option<CapacitorState>,
}

/// The full mirrored fleet state: a command plus a mapping from turtle id to
/// [`TurtleState`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct State {
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub command: Option<Command>,
	#[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
	pub turtles: BTreeMap<String, TurtleState>,
}

/// The fixed set of turtle ids the cache initializes with at connect time.
pub const INITIAL_TURTLE_IDS: [&str; 6] = ["1", "2", "3", "4", "5", "6"];

impl State {
	/// The cache's value immediately after a Controller Connection handshake:
	/// no command, six turtles with every attribute unset.
	pub fn initial() -> Self {
		let mut turtles = BTreeMap::new();
		for id in INITIAL_TURTLE_IDS {
			turtles.insert(id.to_string(), TurtleState::default());
		}
		Self {
			command: None,
			turtles,
		}
	}
}

#[cfg(test)]
mod test {
	use super::*;

	#[test]
	fn initial_state_has_six_empty_turtles() {
		let st = State::initial();
		assert_eq!(st.turtles.len(), 6);
		for id in INITIAL_TURTLE_IDS {
			assert_eq!(st.turtles.get(id), Some(&TurtleState::default()));
		}
		assert_eq!(st.command, None);
	}

	#[test]
	fn turtle_state_round_trips_through_json() {
		let mut st = TurtleState::default();
		st.battery_voltage = Some(42);
		st.home_goal = Some(HomeGoal::Blue);
		let json = serde_json::to_string(&st).unwrap();
		let decoded: TurtleState = serde_json::from_str(&json).unwrap();
		assert_eq!(st, decoded);
	}

	#[test]
	fn unset_fields_are_omitted_from_json() {
		let st = TurtleState::default();
		let json = serde_json::to_value(&st).unwrap();
		assert_eq!(json, serde_json::json!({}));
	}

	/// Pins the wire keys to the original's JSON tags (spec.md §8 S1 sends a
	/// bare `{"batteryvoltage":42}`), not a snake-case rendering of the Rust
	/// field names.
	#[test]
	fn wire_keys_match_the_original_json_tags() {
		let mut st = TurtleState::default();
		st.battery_voltage = Some(42);
		st.robot_in_field = Some(true);
		st.emergency_button = Some(false);
		st.kinect1_state = Some(KinectState::Ball);
		st.capacitor_state = Some(CapacitorState::Full);
		st.localization_status = Some(LocalizationStatus::CompassError);

		let json = serde_json::to_value(&st).unwrap();
		assert_eq!(
			json,
			serde_json::json!({
				"batteryvoltage": 42,
				"robotinfield": true,
				"robotembutton": false,
				"kinect1state": "ball",
				"capacitorstate": "full",
				"localizationstatus": "compass_issue",
			})
		);

		let decoded: TurtleState = serde_json::from_value(json).unwrap();
		assert_eq!(decoded, st);
	}

	#[test]
	fn localization_status_uses_the_original_wire_strings() {
		assert_eq!(
			serde_json::to_string(&LocalizationStatus::Localization).unwrap(),
			"\"on\""
		);
		assert_eq!(
			serde_json::to_string(&LocalizationStatus::NoLocalization).unwrap(),
			"\"off\""
		);
		assert_eq!(
			serde_json::to_string(&LocalizationStatus::CompassError).unwrap(),
			"\"compass_issue\""
		);
	}
}
