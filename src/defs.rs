use serde::{Deserialize, Serialize};
use strum::{Display, EnumCount, EnumIter, EnumString};

/* == Circuit == */

/// One independently controllable heating circuit on the controller.
#[derive(
    Copy, Clone, Debug, Display, EnumIter, EnumString, Eq, Hash, PartialEq, Deserialize, Serialize,
)]
#[strum(serialize_all = "UPPERCASE", ascii_case_insensitive)]
#[serde(rename_all = "UPPERCASE")]
pub enum Circuit {
    Hk1,
    Hk2,
}

impl Circuit {
    /// Command name suffix used by the vcontrold XML for this circuit.
    pub fn suffix(self) -> &'static str {
        match self {
            Circuit::Hk1 => "M1",
            Circuit::Hk2 => "M2",
        }
    }

    /// Raw operating mode written when the circuit is switched off.
    ///
    /// HK1 falls back to hot-water-only operation (1) rather than a full
    /// shutdown (0) so domestic water keeps heating.
    pub fn default_off_value(self) -> f32 {
        match self {
            Circuit::Hk1 => 1.,
            Circuit::Hk2 => 0.,
        }
    }
}

/* == Field == */

/// An observable attribute of a circuit, one cache slot each.
#[derive(
    Copy,
    Clone,
    Debug,
    Display,
    EnumCount,
    EnumIter,
    EnumString,
    Eq,
    Hash,
    PartialEq,
    Deserialize,
    Serialize,
)]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
#[serde(rename_all = "snake_case")]
pub enum Field {
    CurrentMode,
    TargetMode,
    CurrentTemperature,
    TargetTemperature,
    DisplayUnit,
}

impl Field {
    /// Value a cache slot holds before the first device round trip.
    pub fn seeded_default(self) -> f32 {
        match self {
            Field::CurrentMode => 0.,
            Field::TargetMode => 2.,
            Field::CurrentTemperature => 21.,
            Field::TargetTemperature => 20.,
            Field::DisplayUnit => 0.,
        }
    }
}

/* == Mode == */

/// External operating mode, as exposed over the API.
///
/// The controller itself reports raw values 0..=3 (off, hot water only,
/// heating + hot water, ...); anything at or above 2 means the circuit is
/// actively heating.
#[derive(Copy, Clone, Debug, Display, EnumString, Eq, PartialEq, Deserialize, Serialize)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Off,
    Heat,
}

impl Mode {
    pub fn from_raw(raw: f32) -> Mode {
        if raw >= 2. { Mode::Heat } else { Mode::Off }
    }

    pub fn to_raw(self, off_value: f32) -> f32 {
        match self {
            Mode::Heat => 2.,
            Mode::Off => off_value,
        }
    }
}

/* == Command table == */

/// Per-circuit mapping from cache fields to vcontrold command names.
///
/// The names are opaque to the queue and the channel; they come straight
/// from the daemon's XML command set. Fields without a read target are not
/// observed by the refresh pass, fields without a write target reject
/// writes before anything is enqueued.
#[derive(Clone, Debug)]
pub struct CommandTable {
    read: [Option<String>; Field::COUNT],
    write: [Option<String>; Field::COUNT],
}

impl CommandTable {
    /// The command names the original integration used, suffixed for the
    /// circuit. Only the operating mode and the room setpoint have device
    /// commands by default; the rest stay cache-local until configured.
    pub fn defaults(circuit: Circuit) -> Self {
        let suffix = circuit.suffix();

        let mut table = Self {
            read: Default::default(),
            write: Default::default(),
        };

        table.read[Field::CurrentMode as usize] = Some(format!("getVitoBetriebsart{suffix}"));
        table.write[Field::TargetMode as usize] = Some(format!("setVitoBetriebsart{suffix}"));
        table.read[Field::TargetTemperature as usize] = Some(format!("getTempRaumNorSoll{suffix}"));
        table.write[Field::TargetTemperature as usize] =
            Some(format!("setTempRaumNorSoll{suffix}"));

        table
    }

    pub fn read_target(&self, field: Field) -> Option<&str> {
        self.read[field as usize].as_deref()
    }

    pub fn write_target(&self, field: Field) -> Option<&str> {
        self.write[field as usize].as_deref()
    }

    pub fn set_read_target(&mut self, field: Field, target: String) {
        self.read[field as usize] = Some(target);
    }

    pub fn set_write_target(&mut self, field: Field, target: String) {
        self.write[field as usize] = Some(target);
    }

    /// Fields the refresh pass polls from the device.
    pub fn observed_fields(&self) -> impl Iterator<Item = Field> + '_ {
        use strum::IntoEnumIterator;

        Field::iter().filter(|field| self.read[*field as usize].is_some())
    }
}
