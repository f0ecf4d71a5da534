//! Safety-object taxonomy and model class mapping.

use serde::{Deserialize, Serialize};

/// Domain category of an expected safety object.
///
/// Display colors and icons belong to the presentation layer, not here.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SafetyObjectClass {
    OxygenTank,
    FireExtinguisher,
    FireAlarm,
    FirstAidKit,
    EmergencyLight,
    SafetyHelmet,
    CommunicationDevice,
}

impl SafetyObjectClass {
    /// Every class, in enumeration order. All of them are required in a session.
    pub const ALL: [SafetyObjectClass; 7] = [
        SafetyObjectClass::OxygenTank,
        SafetyObjectClass::FireExtinguisher,
        SafetyObjectClass::FireAlarm,
        SafetyObjectClass::FirstAidKit,
        SafetyObjectClass::EmergencyLight,
        SafetyObjectClass::SafetyHelmet,
        SafetyObjectClass::CommunicationDevice,
    ];

    pub fn display_name(&self) -> &'static str {
        match self {
            SafetyObjectClass::OxygenTank => "Oxygen Tank",
            SafetyObjectClass::FireExtinguisher => "Fire Extinguisher",
            SafetyObjectClass::FireAlarm => "Fire Alarm",
            SafetyObjectClass::FirstAidKit => "First Aid Kit",
            SafetyObjectClass::EmergencyLight => "Emergency Light",
            SafetyObjectClass::SafetyHelmet => "Safety Helmet",
            SafetyObjectClass::CommunicationDevice => "Communication Device",
        }
    }

    /// Internal identifier, e.g. `OXYGEN_TANK`.
    pub fn identifier(&self) -> &'static str {
        match self {
            SafetyObjectClass::OxygenTank => "OXYGEN_TANK",
            SafetyObjectClass::FireExtinguisher => "FIRE_EXTINGUISHER",
            SafetyObjectClass::FireAlarm => "FIRE_ALARM",
            SafetyObjectClass::FirstAidKit => "FIRST_AID_KIT",
            SafetyObjectClass::EmergencyLight => "EMERGENCY_LIGHT",
            SafetyObjectClass::SafetyHelmet => "SAFETY_HELMET",
            SafetyObjectClass::CommunicationDevice => "COMMUNICATION_DEVICE",
        }
    }

    /// Absence of a critical object is a high-severity condition.
    pub fn is_critical(&self) -> bool {
        matches!(
            self,
            SafetyObjectClass::OxygenTank
                | SafetyObjectClass::FireExtinguisher
                | SafetyObjectClass::FireAlarm
        )
    }

    pub fn critical() -> impl Iterator<Item = SafetyObjectClass> {
        Self::ALL.into_iter().filter(|c| c.is_critical())
    }

    /// Case-insensitive exact match against display name or identifier.
    pub fn from_label(label: &str) -> Option<Self> {
        let label = label.trim();
        Self::ALL.into_iter().find(|c| {
            c.display_name().eq_ignore_ascii_case(label) || c.identifier().eq_ignore_ascii_case(label)
        })
    }
}

impl std::fmt::Display for SafetyObjectClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.display_name())
    }
}

/// Compatibility table for the bundled COCO-style default model.
const DEFAULT_MODEL_TABLE: &[(u32, SafetyObjectClass)] = &[
    (39, SafetyObjectClass::OxygenTank),
    (0, SafetyObjectClass::FireExtinguisher),
    (84, SafetyObjectClass::FireAlarm),
    (73, SafetyObjectClass::FirstAidKit),
    (47, SafetyObjectClass::EmergencyLight),
    (25, SafetyObjectClass::SafetyHelmet),
    (67, SafetyObjectClass::CommunicationDevice),
];

/// Map a model class index to a safety object.
///
/// The default-model table wins. Otherwise, when `class_id` indexes into
/// `model_labels`, the label and each display name are compared by
/// case-insensitive substring in both directions; first match in
/// enumeration order wins.
pub fn map_class_to_safety_object(
    class_id: u32,
    model_labels: &[String],
) -> Option<SafetyObjectClass> {
    if let Some((_, class)) = DEFAULT_MODEL_TABLE.iter().find(|(id, _)| *id == class_id) {
        return Some(*class);
    }
    let label = model_labels.get(class_id as usize)?;
    match_label_fuzzy(label)
}

/// Bidirectional case-insensitive substring match of a free-form label.
pub fn match_label_fuzzy(label: &str) -> Option<SafetyObjectClass> {
    let label = label.trim().to_lowercase();
    if label.is_empty() {
        return None;
    }
    SafetyObjectClass::ALL.into_iter().find(|c| {
        let name = c.display_name().to_lowercase();
        name.contains(&label) || label.contains(&name)
    })
}
