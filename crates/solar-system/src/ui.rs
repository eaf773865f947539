//! Settings overlay: frame timing, tone mapping, exposure and environment selection

use crate::clock::FrameClock;
use solar_render::{RenderSettings, ToneMapOperator};

/// Exposure slider range
pub const EXPOSURE_RANGE: std::ops::RangeInclusive<f32> = 0.0..=10.0;

#[derive(Debug, Clone, PartialEq)]
pub enum SettingsAction {
    /// Render settings were edited; push them to the pipeline
    SettingsChanged(RenderSettings),
    /// Rebuild the IBL maps from the environment image at this index
    RebuildEnvironment(usize),
}

/// Settings window state that outlives a single frame
pub struct SettingsPanel {
    environments: Vec<String>,
    selected_environment: usize,
    visible: bool,
}

impl SettingsPanel {
    pub fn new(environments: Vec<String>, selected_environment: usize) -> Self {
        Self {
            environments,
            selected_environment,
            visible: true,
        }
    }

    pub fn toggle(&mut self) {
        self.visible = !self.visible;
    }

    pub fn selected_environment(&self) -> usize {
        self.selected_environment
    }

    /// Draw the settings window. Returns the actions to apply after the frame.
    pub fn show(&mut self, ctx: &egui::Context, settings: &RenderSettings, clock: &FrameClock) -> Vec<SettingsAction> {
        let mut actions = Vec::new();
        if !self.visible {
            return actions;
        }

        let mut edited = *settings;
        egui::Window::new("Settings")
            .default_pos([10.0, 10.0])
            .resizable(false)
            .show(ctx, |ui| {
                ui.label(format!(
                    "Application average {:.3} ms/frame ({:.1} FPS)",
                    clock.average_frame_ms(),
                    clock.average_fps()
                ));
                ui.separator();

                egui::ComboBox::from_label("Tone Mapping")
                    .selected_text(edited.tone_map.label())
                    .show_ui(ui, |ui| {
                        for op in ToneMapOperator::ALL {
                            ui.selectable_value(&mut edited.tone_map, op, op.label());
                        }
                    });
                if edited.tone_map.uses_exposure() {
                    ui.add(egui::Slider::new(&mut edited.exposure, EXPOSURE_RANGE).text("Exposure"));
                }

                ui.collapsing("Bloom", |ui| {
                    ui.add(egui::Slider::new(&mut edited.bloom_iterations, 0..=20).text("Blur passes"));
                    ui.add(egui::Slider::new(&mut edited.bloom_threshold, 0.0..=10.0).text("Threshold"));
                });

                ui.collapsing("Lighting", |ui| {
                    ui.add(egui::Slider::new(&mut edited.emission_strength, 0.0..=10.0).text("Emission"));
                    ui.add(egui::Slider::new(&mut edited.specular_strength, 0.0..=1.0).text("Specular"));
                    ui.add(egui::Slider::new(&mut edited.light.intensity, 0.0..=500.0).text("Light intensity"));
                });

                if !self.environments.is_empty() {
                    ui.separator();
                    let mut selected = self.selected_environment;
                    let current = self
                        .environments
                        .get(selected)
                        .map(String::as_str)
                        .unwrap_or("(none)");
                    egui::ComboBox::from_label("Environment")
                        .selected_text(current)
                        .show_ui(ui, |ui| {
                            for (index, name) in self.environments.iter().enumerate() {
                                ui.selectable_value(&mut selected, index, name);
                            }
                        });
                    if selected != self.selected_environment {
                        self.selected_environment = selected;
                        actions.push(SettingsAction::RebuildEnvironment(selected));
                    } else if ui.button("Rebuild environment").clicked() {
                        actions.push(SettingsAction::RebuildEnvironment(selected));
                    }
                }
            });

        if edited != *settings {
            actions.push(SettingsAction::SettingsChanged(edited));
        }
        actions
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run_panel(panel: &mut SettingsPanel, settings: &RenderSettings) -> Vec<SettingsAction> {
        let ctx = egui::Context::default();
        let clock = FrameClock::new();
        let mut actions = Vec::new();
        let _ = ctx.run(egui::RawInput::default(), |ctx| {
            actions = panel.show(ctx, settings, &clock);
        });
        actions
    }

    #[test]
    fn untouched_panel_emits_nothing() {
        let mut panel = SettingsPanel::new(vec!["Space.hdr".into()], 0);
        let settings = RenderSettings::default();
        assert!(run_panel(&mut panel, &settings).is_empty());
    }

    #[test]
    fn hidden_panel_emits_nothing() {
        let mut panel = SettingsPanel::new(vec!["Space.hdr".into()], 0);
        panel.toggle();
        assert!(run_panel(&mut panel, &RenderSettings::default()).is_empty());
        assert_eq!(panel.selected_environment(), 0);
    }

    #[test]
    fn exposure_range_covers_default() {
        let settings = RenderSettings::default();
        assert!(EXPOSURE_RANGE.contains(&settings.exposure));
    }
}
