//! Structural patches over [`State`]/[`TurtleState`].
//!
//! The same patch shape serves two roles in the protocol: it's what a
//! Controller state push is interpreted as when merged into the cache
//! (§4.D "cache merge semantics"), and it's what the diff engine (§4.C)
//! produces to describe a change to the Operator. Both need to distinguish
//! three states per attribute: absent (no opinion, leave untouched), explicit
//! `null` (clear the attribute), and an explicit value (set it) — the
//! "double option" pattern, serialized with `serde_with`.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DoubleOption};

use crate::state::{
	BallFound, CapacitorState, Command, Cpb, HomeGoal, KinectState, LocalizationStatus,
	Role, State, TeamColor, TurtleState,
};

macro_rules! patch_struct {
	($name:ident for $target:ident { $($field:ident ($wire:literal): $ty:ty),* $(,)? }) => {
		#[serde_as]
		#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
		#[serde(deny_unknown_fields)]
		pub struct $name {
			$(
				#[serde_as(as = "Option<DoubleOption<_>>")]
				#[serde(default, skip_serializing_if = "Option::is_none", rename = $wire)]
				pub $field: Option<Option<$ty>>,
			)*
		}

		impl $name {
			/// True if every field is absent (no-op patch).
			pub fn is_empty(&self) -> bool {
				$(self.$field.is_none() &&)* true
			}

			fn diff(old: &$target, new: &$target) -> Self {
				Self {
					$($field: diff_field(old.$field, new.$field),)*
				}
			}
		}
	};
}

fn diff_field<T: PartialEq + Clone>(
	old: Option<T>,
	new: Option<T>,
) -> Option<Option<T>> {
	if old == new {
		None
	} else {
		Some(new)
	}
}

fn overlay_field<T: Clone>(base: Option<T>, patch: Option<Option<T>>) -> Option<T> {
	match patch {
		None => base,
		Some(new) => new,
	}
}

patch_struct!(TurtlePatch for TurtleState {
	vision("vision"): bool,
	motion("motion"): bool,
	worldmodel("worldmodel"): bool,
	appman("appman"): bool,
	robot_in_field("robotinfield"): bool,
	emergency_button("robotembutton"): bool,
	restart_count_motion("restartcountmotion"): u8,
	restart_count_vision("restartcountvision"): u8,
	restart_count_worldmodel("restartcountworldmodel"): u8,
	ball_found("ballfound"): BallFound,
	localization_status("localizationstatus"): LocalizationStatus,
	cpb("cpb"): Cpb,
	battery_voltage("batteryvoltage"): u8,
	emergency_status("emergencystatus"): u8,
	role("role"): Role,
	refbox_role("refboxrole"): Role,
	home_goal("homegoal"): HomeGoal,
	team_color("teamcolor"): TeamColor,
	active_dev_pc("activedevpc"): u8,
	kinect1_state("kinect1state"): KinectState,
	kinect2_state("kinect2state"): KinectState,
	comm_status("commstatus"): bool,
	software_svn_rev("sofsvnrev"): u32,
	lib_svn_rev("libsvnrev"): u32,
	cpu0_load("cpu0load"): u8,
	cpu1_load("cpu1load"): u8,
	temperature_m1("temperature_m1"): u8,
	temperature_m2("temperature_m2"): u8,
	temperature_m3("temperature_m3"): u8,
	is_active("is_active"): bool,
	cam_status("cam_status"): u8,
	capacitor_state("capacitorstate"): CapacitorState,
});

impl TurtlePatch {
	fn diff_from(old: &TurtleState, new: &TurtleState) -> Self {
		Self::diff(old, new)
	}

	fn overlay_onto(&self, base: &TurtleState) -> TurtleState {
		TurtleState {
			vision: overlay_field(base.vision, self.vision),
			motion: overlay_field(base.motion, self.motion),
			worldmodel: overlay_field(base.worldmodel, self.worldmodel),
			appman: overlay_field(base.appman, self.appman),
			robot_in_field: overlay_field(base.robot_in_field, self.robot_in_field),
			emergency_button: overlay_field(
				base.emergency_button,
				self.emergency_button,
			),
			restart_count_motion: overlay_field(
				base.restart_count_motion,
				self.restart_count_motion,
			),
			restart_count_vision: overlay_field(
				base.restart_count_vision,
				self.restart_count_vision,
			),
			restart_count_worldmodel: overlay_field(
				base.restart_count_worldmodel,
				self.restart_count_worldmodel,
			),
			ball_found: overlay_field(base.ball_found, self.ball_found),
			localization_status: overlay_field(
				base.localization_status,
				self.localization_status,
			),
			cpb: overlay_field(base.cpb, self.cpb),
			battery_voltage: overlay_field(base.battery_voltage, self.battery_voltage),
			emergency_status: overlay_field(
				base.emergency_status,
				self.emergency_status,
			),
			role: overlay_field(base.role, self.role),
			refbox_role: overlay_field(base.refbox_role, self.refbox_role),
			home_goal: overlay_field(base.home_goal, self.home_goal),
			team_color: overlay_field(base.team_color, self.team_color),
			active_dev_pc: overlay_field(base.active_dev_pc, self.active_dev_pc),
			kinect1_state: overlay_field(base.kinect1_state, self.kinect1_state),
			kinect2_state: overlay_field(base.kinect2_state, self.kinect2_state),
			comm_status: overlay_field(base.comm_status, self.comm_status),
			software_svn_rev: overlay_field(
				base.software_svn_rev,
				self.software_svn_rev,
			),
			lib_svn_rev: overlay_field(base.lib_svn_rev, self.lib_svn_rev),
			cpu0_load: overlay_field(base.cpu0_load, self.cpu0_load),
			cpu1_load: overlay_field(base.cpu1_load, self.cpu1_load),
			temperature_m1: overlay_field(base.temperature_m1, self.temperature_m1),
			temperature_m2: overlay_field(base.temperature_m2, self.temperature_m2),
			temperature_m3: overlay_field(base.temperature_m3, self.temperature_m3),
			is_active: overlay_field(base.is_active, self.is_active),
			cam_status: overlay_field(base.cam_status, self.cam_status),
			capacitor_state: overlay_field(base.capacitor_state, self.capacitor_state),
		}
	}
}

/// Structural patch over [`State`]. Used both as the cache-merge payload and
/// as the diff-engine output.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StatePatch {
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub command: Option<Option<Command>>,
	/// The whole map is only ever replaced by explicitly-present entries;
	/// `None` here means "no opinion about any turtle", not "clear all
	/// turtles".
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub turtles: Option<BTreeMap<String, TurtlePatch>>,
}

impl StatePatch {
	pub fn is_empty(&self) -> bool {
		self.command.is_none()
			&& self
				.turtles
				.as_ref()
				.map(|m| m.values().all(TurtlePatch::is_empty))
				.unwrap_or(true)
	}

	/// Builds the outbound patch for a `SetCommand` request: only `command`
	/// is explicitly set, every turtle is left with no opinion.
	pub fn set_command(cmd: Command) -> Self {
		Self {
			command: Some(Some(cmd)),
			turtles: None,
		}
	}

	/// Builds the outbound patch for a `SetTurtleState` request. Every
	/// attribute the caller populated on a given turtle becomes an explicit
	/// "set" entry; attributes left `None` stay absent (no opinion), not a
	/// clear — this direction has no way to request clearing a field, which
	/// matches the public contract taking a plain [`TurtleState`].
	pub fn set_turtles(turtles: BTreeMap<String, TurtleState>) -> Self {
		let default = TurtleState::default();
		let turtles = turtles
			.into_iter()
			.map(|(id, ts)| (id, TurtlePatch::diff_from(&default, &ts)))
			.collect();
		Self {
			command: None,
			turtles: Some(turtles),
		}
	}

	/// Builds the outbound patch for a `SetState` request, combining a
	/// command opinion (if any) with per-turtle opinions derived the same
	/// way as [`Self::set_turtles`].
	pub fn from_state(state: &State) -> Self {
		let mut patch = Self::set_turtles(state.turtles.clone());
		patch.command = state.command.map(Some);
		patch
	}
}

/// Computes the diff from `old` to `new`. A `None` old is treated as
/// "everything changed" (§4.C): the returned patch mirrors `new` verbatim.
/// Returns `None` ("no update") if nothing structurally changed.
pub fn diff(old: Option<&State>, new: &State) -> Option<StatePatch> {
	let old = match old {
		None => {
			let turtles = if new.turtles.is_empty() {
				None
			} else {
				Some(
					new.turtles
						.iter()
						.map(|(id, ts)| (id.clone(), TurtlePatch::diff_from(&TurtleState::default(), ts)))
						.collect(),
				)
			};
			let patch = StatePatch {
				command: new.command.map(Some),
				turtles,
			};
			return if patch.is_empty() { None } else { Some(patch) };
		}
		Some(old) => old,
	};

	let command = diff_field(old.command, new.command);

	let mut turtle_diffs = BTreeMap::new();
	let mut ids: Vec<&String> = old.turtles.keys().chain(new.turtles.keys()).collect();
	ids.sort();
	ids.dedup();
	for id in ids {
		let default = TurtleState::default();
		let o = old.turtles.get(id).unwrap_or(&default);
		let n = new.turtles.get(id).unwrap_or(&default);
		let d = TurtlePatch::diff_from(o, n);
		if !d.is_empty() {
			turtle_diffs.insert(id.clone(), d);
		}
	}
	let turtles = if turtle_diffs.is_empty() {
		None
	} else {
		Some(turtle_diffs)
	};

	let patch = StatePatch { command, turtles };
	if patch.is_empty() {
		None
	} else {
		Some(patch)
	}
}

/// Applies `patch` onto `base`, returning the resulting state. Used both to
/// merge an incoming Controller push into the cache and, in tests, to verify
/// the inverse-overlay property of [`diff`].
pub fn overlay(base: &State, patch: &StatePatch) -> State {
	let command = overlay_field(base.command, patch.command);

	let mut turtles = base.turtles.clone();
	if let Some(patch_turtles) = &patch.turtles {
		for (id, tpatch) in patch_turtles {
			let entry = turtles.entry(id.clone()).or_default();
			*entry = tpatch.overlay_onto(entry);
		}
	}

	State { command, turtles }
}

#[cfg(test)]
mod test {
	use super::*;
	use crate::state::HomeGoal;

	#[test]
	fn diff_of_equal_states_is_none() {
		let a = State::initial();
		assert_eq!(diff(Some(&a), &a), None);
	}

	#[test]
	fn diff_with_nil_old_equals_new() {
		let mut b = State::initial();
		b.command = Some(Command::Stop);
		let patch = diff(None, &b).expect("non-empty");
		let rebuilt = overlay(&State::default(), &patch);
		assert_eq!(rebuilt.command, b.command);
	}

	#[test]
	fn overlay_of_diff_reconstructs_new() {
		let mut a = State::initial();
		let mut b = a.clone();
		b.command = Some(Command::Start);
		b.turtles.get_mut("3").unwrap().battery_voltage = Some(42);
		b.turtles.get_mut("3").unwrap().home_goal = Some(HomeGoal::Blue);

		let patch = diff(Some(&a), &b).expect("non-empty diff");
		let rebuilt = overlay(&a, &patch);
		assert_eq!(rebuilt, b);

		a.command = Some(Command::Start);
		assert_ne!(a, b);
	}

	#[test]
	fn removal_is_expressed_as_explicit_null_in_the_diff() {
		let mut a = State::initial();
		a.turtles.get_mut("1").unwrap().battery_voltage = Some(10);
		let mut b = a.clone();
		b.turtles.get_mut("1").unwrap().battery_voltage = None;

		let patch = diff(Some(&a), &b).expect("non-empty diff");
		let turtle_patch = &patch.turtles.as_ref().unwrap()["1"];
		assert_eq!(turtle_patch.battery_voltage, Some(None));

		let rebuilt = overlay(&a, &patch);
		assert_eq!(rebuilt.turtles["1"].battery_voltage, None);
	}

	#[test]
	fn unmentioned_turtles_keep_previous_values() {
		let mut a = State::initial();
		a.turtles.get_mut("2").unwrap().battery_voltage = Some(7);
		let patch = StatePatch {
			command: None,
			turtles: Some(BTreeMap::from([(
				"1".to_string(),
				TurtlePatch {
					battery_voltage: Some(Some(1)),
					..Default::default()
				},
			)])),
		};
		let rebuilt = overlay(&a, &patch);
		assert_eq!(rebuilt.turtles["2"].battery_voltage, Some(7));
		assert_eq!(rebuilt.turtles["1"].battery_voltage, Some(1));
	}

	#[test]
	fn set_command_leaves_turtles_unopinionated() {
		let patch = StatePatch::set_command(Command::Stop);
		assert_eq!(patch.command, Some(Some(Command::Stop)));
		assert_eq!(patch.turtles, None);

		let base = State::initial();
		let applied = overlay(&base, &patch);
		assert_eq!(applied.command, Some(Command::Stop));
		assert_eq!(applied.turtles, base.turtles);
	}

	/// spec.md §8 S1: the Controller pushes a bare `state{turtles:{"1":
	/// {batteryvoltage:42}}}`, using the original's wire key directly.
	#[test]
	fn state_patch_decodes_the_original_wire_key() {
		let json = r#"{"turtles":{"1":{"batteryvoltage":42}}}"#;
		let patch: StatePatch = serde_json::from_str(json).unwrap();
		let turtle_patch = &patch.turtles.as_ref().unwrap()["1"];
		assert_eq!(turtle_patch.battery_voltage, Some(Some(42)));
	}

	#[test]
	fn set_turtles_only_sets_populated_attributes() {
		let mut ts = TurtleState::default();
		ts.home_goal = Some(HomeGoal::Blue);
		let patch = StatePatch::set_turtles(BTreeMap::from([("3".to_string(), ts)]));

		let base = State::initial();
		let applied = overlay(&base, &patch);
		assert_eq!(applied.turtles["3"].home_goal, Some(HomeGoal::Blue));
		assert_eq!(applied.turtles["3"].battery_voltage, None);
		assert_eq!(applied.turtles["1"], base.turtles["1"]);
	}
}
