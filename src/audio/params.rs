// src/audio/params.rs
// Live mix coefficients shared between the control thread and the capture callback

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// One of the three adjustable mix coefficients
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MixParameter {
    CenterAttenuation,
    VocalRemovalMix,
    MasterVolume,
}

impl MixParameter {
    /// Inclusive upper bound; every parameter bottoms out at 0.0
    pub fn max(self) -> f32 {
        match self {
            MixParameter::CenterAttenuation | MixParameter::VocalRemovalMix => 1.0,
            MixParameter::MasterVolume => 1.5,
        }
    }

    /// Amount a single key press moves the value
    pub fn step(self) -> f32 {
        match self {
            MixParameter::CenterAttenuation | MixParameter::MasterVolume => 0.05,
            MixParameter::VocalRemovalMix => 0.10,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            MixParameter::CenterAttenuation => "Center Attenuation",
            MixParameter::VocalRemovalMix => "Vocal Removal Mix",
            MixParameter::MasterVolume => "Master Volume",
        }
    }

    fn clamp(self, value: f32) -> f32 {
        // NaN would slip through f32::clamp
        if value.is_nan() {
            return 0.0;
        }
        value.clamp(0.0, self.max())
    }
}

/// Snapshot of the mix coefficients. Fields stay within range by construction.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MixParameters {
    center_attenuation: f32,
    vocal_removal_mix: f32,
    master_volume: f32,
}

impl MixParameters {
    pub const DEFAULT_CENTER_ATTENUATION: f32 = 0.6;
    pub const DEFAULT_VOCAL_REMOVAL_MIX: f32 = 1.0;
    pub const DEFAULT_MASTER_VOLUME: f32 = 1.0;

    /// Build a parameter set, clamping each value into its range
    pub fn new(center_attenuation: f32, vocal_removal_mix: f32, master_volume: f32) -> Self {
        Self {
            center_attenuation: MixParameter::CenterAttenuation.clamp(center_attenuation),
            vocal_removal_mix: MixParameter::VocalRemovalMix.clamp(vocal_removal_mix),
            master_volume: MixParameter::MasterVolume.clamp(master_volume),
        }
    }

    pub fn center_attenuation(&self) -> f32 {
        self.center_attenuation
    }

    pub fn vocal_removal_mix(&self) -> f32 {
        self.vocal_removal_mix
    }

    pub fn master_volume(&self) -> f32 {
        self.master_volume
    }

    pub fn get(&self, param: MixParameter) -> f32 {
        match param {
            MixParameter::CenterAttenuation => self.center_attenuation,
            MixParameter::VocalRemovalMix => self.vocal_removal_mix,
            MixParameter::MasterVolume => self.master_volume,
        }
    }

    pub fn set(&mut self, param: MixParameter, value: f32) {
        let value = param.clamp(value);
        match param {
            MixParameter::CenterAttenuation => self.center_attenuation = value,
            MixParameter::VocalRemovalMix => self.vocal_removal_mix = value,
            MixParameter::MasterVolume => self.master_volume = value,
        }
    }

    /// Move `param` by `steps` key presses (negative decreases), clamped
    pub fn nudge(&mut self, param: MixParameter, steps: i32) {
        let value = self.get(param) + param.step() * steps as f32;
        self.set(param, value);
    }

    /// Percentage shown in status lines
    pub fn percent(&self, param: MixParameter) -> u32 {
        (self.get(param) * 100.0).round() as u32
    }
}

impl Default for MixParameters {
    fn default() -> Self {
        Self {
            center_attenuation: Self::DEFAULT_CENTER_ATTENUATION,
            vocal_removal_mix: Self::DEFAULT_VOCAL_REMOVAL_MIX,
            master_volume: Self::DEFAULT_MASTER_VOLUME,
        }
    }
}

/// Mutex-guarded parameters. Critical sections only copy or update the three
/// floats; no mixing math or I/O happens while the lock is held.
#[derive(Debug, Clone, Default)]
pub struct ParameterStore {
    inner: Arc<Mutex<MixParameters>>,
}

impl ParameterStore {
    pub fn new(initial: MixParameters) -> Self {
        Self {
            inner: Arc::new(Mutex::new(initial)),
        }
    }

    // A panic elsewhere cannot leave three Copy floats half-written
    fn guard(&self) -> MutexGuard<'_, MixParameters> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Copy all three coefficients together
    pub fn snapshot(&self) -> MixParameters {
        *self.guard()
    }

    /// Non-blocking snapshot for the audio thread; `None` when the control
    /// thread holds the lock right now
    pub fn try_snapshot(&self) -> Option<MixParameters> {
        match self.inner.try_lock() {
            Ok(params) => Some(*params),
            Err(std::sync::TryLockError::Poisoned(poisoned)) => Some(*poisoned.into_inner()),
            Err(std::sync::TryLockError::WouldBlock) => None,
        }
    }

    /// Apply `change` under the lock and return the resulting snapshot
    pub fn update<F>(&self, change: F) -> MixParameters
    where
        F: FnOnce(&mut MixParameters),
    {
        let mut params = self.guard();
        change(&mut params);
        *params
    }

    pub fn reset(&self) -> MixParameters {
        self.update(|params| *params = MixParameters::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_clamps_out_of_range() {
        let params = MixParameters::new(-0.5, 3.0, 2.0);
        assert_eq!(params.center_attenuation(), 0.0);
        assert_eq!(params.vocal_removal_mix(), 1.0);
        assert_eq!(params.master_volume(), 1.5);

        let params = MixParameters::new(f32::NAN, 0.5, 0.5);
        assert_eq!(params.center_attenuation(), 0.0);
    }

    #[test]
    fn test_repeated_increase_saturates() {
        let mut params = MixParameters::default();
        for _ in 0..100 {
            params.nudge(MixParameter::CenterAttenuation, 1);
            params.nudge(MixParameter::VocalRemovalMix, 1);
            params.nudge(MixParameter::MasterVolume, 1);
            assert!(params.center_attenuation() <= 1.0);
            assert!(params.vocal_removal_mix() <= 1.0);
            assert!(params.master_volume() <= 1.5);
        }
        assert_eq!(params.center_attenuation(), 1.0);
        assert_eq!(params.master_volume(), 1.5);
    }

    #[test]
    fn test_repeated_decrease_floors_at_zero() {
        let mut params = MixParameters::default();
        for _ in 0..100 {
            params.nudge(MixParameter::CenterAttenuation, -1);
            params.nudge(MixParameter::VocalRemovalMix, -1);
            params.nudge(MixParameter::MasterVolume, -1);
            assert!(params.center_attenuation() >= 0.0);
            assert!(params.vocal_removal_mix() >= 0.0);
            assert!(params.master_volume() >= 0.0);
        }
        assert_eq!(params.center_attenuation(), 0.0);
        assert_eq!(params.vocal_removal_mix(), 0.0);
        assert_eq!(params.master_volume(), 0.0);
    }

    #[test]
    fn test_nudge_steps() {
        let mut params = MixParameters::default();
        params.nudge(MixParameter::CenterAttenuation, 1);
        assert_eq!(params.percent(MixParameter::CenterAttenuation), 65);
        params.nudge(MixParameter::VocalRemovalMix, -1);
        assert_eq!(params.percent(MixParameter::VocalRemovalMix), 90);
        params.nudge(MixParameter::MasterVolume, -1);
        assert_eq!(params.percent(MixParameter::MasterVolume), 95);
    }

    #[test]
    fn test_store_reset_restores_defaults() {
        let store = ParameterStore::new(MixParameters::new(0.0, 0.2, 1.4));
        let restored = store.reset();
        assert_eq!(restored, MixParameters::new(0.6, 1.0, 1.0));
        assert_eq!(store.snapshot(), MixParameters::default());
    }

    #[test]
    fn test_try_snapshot_under_contention() {
        let store = ParameterStore::default();
        let held = store.inner.lock().unwrap();
        assert!(store.try_snapshot().is_none());
        drop(held);
        assert_eq!(store.try_snapshot(), Some(MixParameters::default()));
    }

    #[test]
    fn test_store_shared_across_threads() {
        let store = ParameterStore::default();
        let writer = store.clone();
        std::thread::spawn(move || {
            writer.update(|p| p.set(MixParameter::MasterVolume, 0.25));
        })
        .join()
        .unwrap();
        assert_eq!(store.snapshot().master_volume(), 0.25);
    }
}
