use std::sync::Arc;
use std::time::Instant;

use anyhow::{anyhow, Context, Result};
use lifeconfig::LifeConfig;
use scheduler::{PacedScheduler, PollOutcome};
use winit::dpi::PhysicalSize;
use winit::event::{ElementState, Event, WindowEvent};
use winit::event_loop::{ControlFlow, EventLoop};
use winit::keyboard::{Key, NamedKey};
use winit::window::{Window, WindowBuilder};

use crate::gpu::{GpuBackend, WgpuBackend};
use crate::program::{ProgramSet, WgslLoader};
use crate::simulation::{Simulation, SimulationOptions, SimulationState};

type WindowSimulation = Simulation<WgpuBackend, PacedScheduler>;

/// What a key press asks the simulation to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Control {
    Toggle,
    Step,
    Reset,
    Quit,
}

pub fn control_for_key(key: &Key) -> Option<Control> {
    match key {
        Key::Named(NamedKey::Space) => Some(Control::Toggle),
        Key::Named(NamedKey::ArrowRight) => Some(Control::Step),
        Key::Named(NamedKey::Escape) => Some(Control::Quit),
        Key::Character(value) => match value.as_str() {
            " " => Some(Control::Toggle),
            "s" | "S" => Some(Control::Step),
            "r" | "R" => Some(Control::Reset),
            _ => None,
        },
        _ => None,
    }
}

pub fn window_title(step: u64, state: SimulationState) -> String {
    match state {
        SimulationState::Running => format!("lifegrid - generation {step}"),
        other => format!("lifegrid - generation {step} ({other})"),
    }
}

/// Opens the window, starts the simulation and runs the event loop until the
/// window closes.
pub fn run_window(config: LifeConfig, programs: ProgramSet) -> Result<()> {
    let event_loop =
        EventLoop::new().map_err(|err| anyhow!("failed to create event loop: {err}"))?;
    let [width, height] = config.render.window;
    let window = WindowBuilder::new()
        .with_title(window_title(0, SimulationState::Ready))
        .with_inner_size(PhysicalSize::new(width, height))
        .build(&event_loop)
        .map_err(|err| anyhow!("failed to create window: {err}"))?;
    let window = Arc::new(window);

    let backend = WgpuBackend::for_window(window.clone())?;
    let adapter = backend.adapter();
    tracing::info!(
        adapter = %adapter.name,
        backend = %adapter.backend,
        device_type = %adapter.device_type,
        "using GPU adapter"
    );

    let options = SimulationOptions::from_config(config).with_programs(programs);
    let mut simulation =
        Simulation::initialize(backend, PacedScheduler::new(), &WgslLoader, options)
            .context("failed to initialise simulation")?;
    simulation.start();
    refresh_title(&window, &simulation);

    event_loop
        .run(move |event, elwt| match event {
            Event::WindowEvent { window_id, event } if window_id == window.id() => match event {
                WindowEvent::CloseRequested | WindowEvent::Destroyed => elwt.exit(),
                WindowEvent::KeyboardInput { event, .. } => {
                    if event.state != ElementState::Pressed || event.repeat {
                        return;
                    }
                    match control_for_key(&event.logical_key) {
                        Some(Control::Toggle) => simulation.toggle(),
                        Some(Control::Step) => simulation.step(),
                        Some(Control::Reset) => simulation.reset(),
                        Some(Control::Quit) => elwt.exit(),
                        None => return,
                    }
                    refresh_title(&window, &simulation);
                }
                WindowEvent::Resized(new_size) => {
                    simulation.backend_mut().resize(new_size);
                    simulation.redraw();
                }
                WindowEvent::RedrawRequested => {
                    if advance_on_redraw(&mut simulation) {
                        refresh_title(&window, &simulation);
                    }
                }
                _ => {}
            },
            Event::AboutToWait => match simulation.scheduler_mut().poll(Instant::now()) {
                PollOutcome::RefreshNeeded => {
                    tracing::trace!("frame due; requesting redraw");
                    window.request_redraw();
                    elwt.set_control_flow(ControlFlow::Wait);
                }
                PollOutcome::Waiting(deadline) => {
                    elwt.set_control_flow(ControlFlow::WaitUntil(deadline));
                }
                PollOutcome::Idle => elwt.set_control_flow(ControlFlow::Wait),
            },
            _ => {}
        })
        .map_err(|err| anyhow!("window event loop error: {err}"))
}

/// Advances when a scheduled frame is due, otherwise redraws the current
/// generation. Returns whether a frame was advanced.
fn advance_on_redraw<B: GpuBackend>(simulation: &mut Simulation<B, PacedScheduler>) -> bool {
    let advanced = match simulation.scheduler_mut().on_refresh() {
        Some(token) => simulation.on_frame_due(token),
        None => false,
    };
    if !advanced {
        simulation.redraw();
    }
    advanced
}

fn refresh_title(window: &Window, simulation: &WindowSimulation) {
    window.set_title(&window_title(simulation.current_step(), simulation.state()));
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::gpu::SoftwareBackend;

    fn paced(interval: Duration) -> Simulation<SoftwareBackend, PacedScheduler> {
        let mut config = LifeConfig::default();
        config.grid.size = 4;
        config.timing.interval = interval;
        Simulation::initialize(
            SoftwareBackend::new(),
            PacedScheduler::new(),
            &WgslLoader,
            SimulationOptions::from_config(config),
        )
        .unwrap()
    }

    #[test]
    fn keys_map_to_controls() {
        assert_eq!(
            control_for_key(&Key::Named(NamedKey::Space)),
            Some(Control::Toggle)
        );
        assert_eq!(
            control_for_key(&Key::Named(NamedKey::ArrowRight)),
            Some(Control::Step)
        );
        assert_eq!(
            control_for_key(&Key::Named(NamedKey::Escape)),
            Some(Control::Quit)
        );
        assert_eq!(control_for_key(&Key::Character("s".into())), Some(Control::Step));
        assert_eq!(control_for_key(&Key::Character("R".into())), Some(Control::Reset));
        assert_eq!(control_for_key(&Key::Character("x".into())), None);
        assert_eq!(control_for_key(&Key::Named(NamedKey::Enter)), None);
    }

    #[test]
    fn title_shows_generation_and_pause() {
        assert_eq!(
            window_title(12, SimulationState::Running),
            "lifegrid - generation 12"
        );
        assert_eq!(
            window_title(3, SimulationState::Paused),
            "lifegrid - generation 3 (paused)"
        );
    }

    #[test]
    fn redraw_while_paused_draws_without_advancing() {
        let mut sim = paced(Duration::ZERO);
        assert!(!advance_on_redraw(&mut sim));
        assert_eq!(sim.current_step(), 0);
        let stats = sim.backend().stats();
        assert_eq!(stats.frames, 1);
        assert_eq!(stats.dispatches, 0);
    }

    #[test]
    fn redraw_before_the_interval_draws_without_advancing() {
        let mut sim = paced(Duration::from_secs(3600));
        sim.start();
        assert!(!advance_on_redraw(&mut sim));
        assert_eq!(sim.current_step(), 1);
        assert_eq!(sim.backend().stats().frames, 2);
        assert!(sim.pending_frame().is_some());
    }

    #[test]
    fn redraw_advances_a_due_frame() {
        let mut sim = paced(Duration::ZERO);
        sim.start();
        assert!(advance_on_redraw(&mut sim));
        assert_eq!(sim.current_step(), 2);
        let stats = sim.backend().stats();
        assert_eq!(stats.frames, 2);
        assert_eq!(stats.dispatches, 2);
    }
}
