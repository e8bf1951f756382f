use crate::{platform::StatusLight, types::Color};

pub struct StatusIndicator<L> {
    light: L,
    base: Color,
    busy: bool,
    shown: Option<Color>,
}

impl<L: StatusLight> StatusIndicator<L> {
    pub fn new(light: L) -> Self {
        Self {
            light,
            base: Color::OFF,
            busy: false,
            shown: None,
        }
    }

    pub fn show(&mut self, color: Color) {
        self.base = color;
        self.refresh();
    }

    /// While busy the light shows [`Color::BUSY`]; clearing it restores the
    /// stage color.
    pub fn set_busy(&mut self, busy: bool) {
        self.busy = busy;
        self.refresh();
    }

    pub fn current(&self) -> Color {
        if self.busy {
            Color::BUSY
        } else {
            self.base
        }
    }

    pub fn light(&self) -> &L {
        &self.light
    }

    fn refresh(&mut self) {
        let target = self.current();
        if self.shown != Some(target) {
            self.light.show(target);
            self.shown = Some(target);
        }
    }
}
