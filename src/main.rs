#[cfg(feature = "gui")]
use eframe::egui;

#[cfg(feature = "gui")]
use drumseq::{
    parse_query, share_url, DeviceState, EngineConfig, PlaybackEvent, Selection, Sequencer,
    SequencerConfig, Sound, SynthEngine,
};
#[cfg(feature = "gui")]
use std::sync::Arc;

#[cfg(feature = "gui")]
const DEFAULT_SHARE_BASE: &str = "https://drumseq.app/";

#[cfg(feature = "gui")]
fn main() -> Result<(), eframe::Error> {
    env_logger::init();

    // Optional share link (or bare query) to load at startup
    let shared_link = std::env::args().nth(1);

    let options = eframe::NativeOptions {
        viewport: egui::ViewportBuilder::default()
            .with_inner_size([820.0, 520.0])
            .with_title("drumseq - 16 Step Drum Sequencer"),
        ..Default::default()
    };

    eframe::run_native(
        "drumseq",
        options,
        Box::new(|_cc| Ok(Box::new(SequencerApp::new(shared_link)))),
    )
}

#[cfg(not(feature = "gui"))]
fn main() {
    eprintln!("This binary requires the 'gui' feature to be enabled");
    std::process::exit(1);
}

#[cfg(feature = "gui")]
struct SequencerApp {
    sequencer: Sequencer,
    engine: SynthEngine,

    // UI state
    share_base: String,
    current_visual_step: Option<usize>,
    was_focused: bool,
    was_minimized: bool,
}

#[cfg(feature = "gui")]
impl SequencerApp {
    fn new(shared_link: Option<String>) -> Self {
        let engine = SynthEngine::with_default_output(EngineConfig::default());
        let config = SequencerConfig::default();
        let tempo_range = config.tempo_range;
        let mut sequencer = Sequencer::new(config, Arc::new(engine.clone()));

        let mut share_base = DEFAULT_SHARE_BASE.to_string();
        if let Some(link) = shared_link {
            log::info!("loading shared pattern from {link}");
            sequencer.load_shared(parse_query(&link, tempo_range));
            if let Ok(mut url) = url::Url::parse(&link) {
                url.set_query(None);
                share_base = url.into();
            }
        }

        Self {
            sequencer,
            engine,
            share_base,
            current_visual_step: None,
            was_focused: true,
            was_minimized: false,
        }
    }

    fn handle_playback_events(&mut self) {
        for event in self.sequencer.poll_events() {
            match event {
                PlaybackEvent::StepAdvanced(step) => self.current_visual_step = Some(step),
                PlaybackEvent::Triggered(sound) => log::trace!("triggered {sound}"),
            }
        }
        if !self.sequencer.is_playing() {
            self.current_visual_step = None;
        }
    }

    /// Pause output while minimized; resume when the window comes back
    fn handle_window_state(&mut self, ctx: &egui::Context) {
        let (focused, minimized) =
            ctx.input(|i| (i.focused, i.viewport().minimized.unwrap_or(false)));

        if minimized && !self.was_minimized {
            self.engine.suspend();
        } else if !minimized && (self.was_minimized || (focused && !self.was_focused)) {
            self.engine.recover();
        }

        self.was_focused = focused;
        self.was_minimized = minimized;
    }

    fn sound_color(sound: Sound) -> egui::Color32 {
        match sound {
            Sound::Kick => egui::Color32::from_rgb(220, 38, 38),
            Sound::Snare => egui::Color32::from_rgb(234, 88, 12),
            Sound::HiHat => egui::Color32::from_rgb(202, 138, 4),
            Sound::Cymbal => egui::Color32::from_rgb(22, 163, 74),
            Sound::HandClap => egui::Color32::from_rgb(147, 51, 234),
            Sound::CowBell => egui::Color32::from_rgb(79, 70, 229),
        }
    }
}

#[cfg(feature = "gui")]
impl eframe::App for SequencerApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        ctx.request_repaint();

        self.handle_window_state(ctx);
        self.handle_playback_events();

        egui::CentralPanel::default().show(ctx, |ui| {
            ui.heading("drumseq - 16 Step Drum Sequencer");
            ui.add_space(10.0);

            // Transport controls
            ui.horizontal(|ui| {
                let label = if self.sequencer.is_playing() {
                    "⏸ Stop"
                } else {
                    "▶ Play"
                };
                if ui.button(label).clicked() {
                    self.sequencer.toggle_play_pause();
                }

                ui.add_space(20.0);

                ui.label("Tempo:");
                let range = self.sequencer.config().tempo_range;
                let mut tempo = self.sequencer.tempo();
                if ui
                    .add(egui::Slider::new(&mut tempo, range.min..=range.max).suffix(" BPM"))
                    .changed()
                {
                    self.sequencer.update_tempo(tempo);
                }

                ui.add_space(20.0);

                ui.label("Volume:");
                let mut gain = self.engine.master_gain();
                if ui
                    .add(egui::Slider::new(&mut gain, 0.0..=1.0).show_value(false))
                    .changed()
                {
                    self.engine.set_master_gain(gain);
                }

                ui.add_space(20.0);

                if ui.button("Clear").clicked() {
                    self.sequencer.clear_pattern();
                }
            });

            ui.add_space(10.0);

            // Sound selection
            ui.horizontal(|ui| {
                ui.label("Sounds:");
                let selection = self.sequencer.selection();
                for sound in Sound::ALL {
                    let selected = selection == Selection::Sound(sound);
                    let button = egui::Button::new(sound.label())
                        .fill(Self::sound_color(sound))
                        .selected(selected);
                    if ui.add(button).clicked() {
                        self.sequencer.set_selection(Selection::Sound(sound));
                        self.sequencer.preview_sound(sound);
                    }
                }

                let delete = egui::Button::new("🗑 Delete")
                    .fill(egui::Color32::from_rgb(127, 29, 29))
                    .selected(selection == Selection::Delete);
                if ui.add(delete).clicked() {
                    self.sequencer.set_selection(Selection::Delete);
                }
            });

            ui.add_space(20.0);

            // Step grid (16 steps in 2 rows of 8)
            let pattern = self.sequencer.pattern();
            for row in pattern.steps().chunks(8) {
                ui.horizontal(|ui| {
                    for step in row {
                        let is_current = self.current_visual_step == Some(step.id - 1);
                        let text = match step.sound {
                            Some(sound) => format!("{}\n{}", step.id, sound.label()),
                            None => format!("{}", step.id),
                        };
                        let text = if is_current { format!("● {text}") } else { text };

                        let fill = if is_current {
                            egui::Color32::from_rgb(100, 200, 100)
                        } else if let Some(sound) = step.sound {
                            Self::sound_color(sound)
                        } else {
                            egui::Color32::from_rgb(40, 40, 40)
                        };

                        let button = egui::Button::new(text)
                            .min_size(egui::vec2(90.0, 60.0))
                            .fill(fill);
                        if ui.add(button).clicked() {
                            self.sequencer.click_step(step.id);
                        }
                    }
                });
            }

            // Sharing
            ui.separator();
            ui.horizontal(|ui| {
                ui.label("Share:");
                let link = share_url(&self.share_base, self.sequencer.tempo(), &pattern)
                    .unwrap_or_default();
                ui.monospace(&link);
                if ui.button("Copy").clicked() {
                    ctx.output_mut(|o| o.copied_text = link.clone());
                }
            });

            // Info
            ui.separator();
            ui.label("Pick a sound, then click steps to assign it. Click again to remove.");
            match self.engine.state() {
                DeviceState::Running => {}
                DeviceState::Uninitialized => {
                    ui.label("Audio starts on the first play or preview");
                }
                DeviceState::Suspended => {
                    ui.colored_label(egui::Color32::YELLOW, "⚠ Audio output suspended");
                    if ui.button("Resume audio").clicked() {
                        self.engine.recover();
                    }
                }
                DeviceState::Closed => {
                    ui.colored_label(egui::Color32::YELLOW, "⚠ No audio output available");
                }
            }
        });
    }
}
