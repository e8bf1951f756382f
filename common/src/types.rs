use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Quantity {
    pub name: &'static str,
    pub unit: Option<&'static str>,
    pub device_class: Option<&'static str>,
    pub friendly_name: Option<&'static str>,
}

impl Quantity {
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            unit: None,
            device_class: None,
            friendly_name: None,
        }
    }

    pub const fn with_unit(mut self, unit: &'static str) -> Self {
        self.unit = Some(unit);
        self
    }

    pub const fn with_device_class(mut self, device_class: &'static str) -> Self {
        self.device_class = Some(device_class);
        self
    }

    pub const fn with_friendly_name(mut self, friendly_name: &'static str) -> Self {
        self.friendly_name = Some(friendly_name);
        self
    }

    pub fn attributes(&self) -> Attributes {
        Attributes {
            unit_of_measurement: self.unit,
            device_class: self.device_class,
            friendly_name: self.friendly_name,
        }
    }
}

pub const LIGHT: Quantity = Quantity::new("light")
    .with_unit("lx")
    .with_device_class("illuminance")
    .with_friendly_name("Ambient Light");
pub const TEMPERATURE: Quantity = Quantity::new("temp")
    .with_unit("°C")
    .with_device_class("temperature")
    .with_friendly_name("Temperature");
pub const HUMIDITY: Quantity = Quantity::new("humidity")
    .with_unit("%")
    .with_device_class("humidity")
    .with_friendly_name("Humidity");
pub const ECO2: Quantity = Quantity::new("eco2")
    .with_unit("ppm")
    .with_device_class("carbon_dioxide")
    .with_friendly_name("CO₂");
pub const TVOC: Quantity = Quantity::new("tvoc")
    .with_unit("ppb")
    .with_device_class("volatile_organic_compounds")
    .with_friendly_name("Total VOC");
pub const TEMPERATURE_ALT: Quantity = Quantity::new("temp_alt")
    .with_unit("°C")
    .with_device_class("temperature")
    .with_friendly_name("Temperature");
pub const PRESSURE: Quantity = Quantity::new("pressure")
    .with_unit("Pa")
    .with_device_class("pressure")
    .with_friendly_name("Pressure");

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Reading {
    pub quantity: Quantity,
    pub value: f32,
}

impl Reading {
    pub const fn new(quantity: Quantity, value: f32) -> Self {
        Self { quantity, value }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Attributes {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit_of_measurement: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_class: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub friendly_name: Option<&'static str>,
}

impl Attributes {
    pub fn is_empty(&self) -> bool {
        self.unit_of_measurement.is_none()
            && self.device_class.is_none()
            && self.friendly_name.is_none()
    }
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct StatePayload {
    pub state: f32,
    #[serde(skip_serializing_if = "Attributes::is_empty")]
    pub attributes: Attributes,
}

impl From<&Reading> for StatePayload {
    fn from(reading: &Reading) -> Self {
        Self {
            state: reading.value,
            attributes: reading.quantity.attributes(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Color {
    pub const OFF: Self = Self::rgb(0, 0, 0);
    pub const LOADING_CONFIG: Self = Self::rgb(0, 0, 255);
    pub const CONNECTING: Self = Self::rgb(0, 255, 255);
    pub const WAITING_DEVICES: Self = Self::rgb(255, 255, 255);
    pub const BUSY: Self = Self::rgb(255, 0, 255);
    pub const ERROR: Self = Self::rgb(255, 0, 0);

    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootStage {
    Idle,
    ConfigLoaded,
    NetworkReady,
    DevicesReady,
    Running,
}

impl BootStage {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "IDLE",
            Self::ConfigLoaded => "CONFIG_LOADED",
            Self::NetworkReady => "NETWORK_READY",
            Self::DevicesReady => "DEVICES_READY",
            Self::Running => "RUNNING",
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;

    #[test]
    fn payload_carries_only_set_attributes() {
        let reading = Reading::new(Quantity::new("temp").with_unit("°C"), 21.5);
        let payload = serde_json::to_value(StatePayload::from(&reading)).unwrap();

        assert_eq!(
            payload,
            json!({"state": 21.5, "attributes": {"unit_of_measurement": "°C"}})
        );
    }

    #[test]
    fn payload_omits_empty_attributes() {
        let reading = Reading::new(Quantity::new("raw"), 3.0);
        let payload = serde_json::to_string(&StatePayload::from(&reading)).unwrap();

        assert_eq!(payload, r#"{"state":3.0}"#);
    }

    #[test]
    fn attributes_keep_hub_order() {
        let reading = Reading::new(ECO2, 400.0);
        let payload = serde_json::to_string(&StatePayload::from(&reading)).unwrap();

        assert_eq!(
            payload,
            r#"{"state":400.0,"attributes":{"unit_of_measurement":"ppm","device_class":"carbon_dioxide","friendly_name":"CO₂"}}"#
        );
    }
}
