//! Paddle: a sample game module
//!
//! Two scripts share one playfield. `BallController` moves the ball and
//! bounces it off the walls and the paddle, `PaddleController` chases the
//! ball at a capped speed so it misses now and then. The module also
//! supplies the runtime application, which ends the game after
//! [`MAX_MISSES`] misses.
//!
//! Build with `cargo build -p paddle_game` and point a runtime config at
//! the resulting library (see `demos/paddle_game/luden.toml`).

use luden_core::{EntityId, Vec2};
use luden_native::sdk::{ApplicationSpec, GameModule, ScriptRegistrar, ScriptableBehavior, SdkError};
use luden_native::RuntimeApplication;
use parking_lot::Mutex;

pub const MAX_MISSES: u32 = 3;

const PADDLE_SPEED: f64 = 260.0;
const PADDLE_WIDTH: f64 = 96.0;
const BALL_SPEED: Vec2 = Vec2::new(180.0, 240.0);

/// Game state shared by both scripts
#[derive(Debug, Clone, PartialEq)]
pub struct Playfield {
    pub width: f64,
    pub height: f64,
    pub paddle_x: f64,
    pub paddle_width: f64,
    pub ball: Vec2,
    pub velocity: Vec2,
    pub bounces: u32,
    pub misses: u32,
}

impl Playfield {
    pub fn new(width: f64, height: f64) -> Self {
        Self {
            width,
            height,
            paddle_x: width / 2.0,
            paddle_width: PADDLE_WIDTH,
            ball: Vec2::new(width / 2.0, height / 2.0),
            velocity: BALL_SPEED,
            bounces: 0,
            misses: 0,
        }
    }

    fn serve(&mut self) {
        self.ball = Vec2::new(self.width / 2.0, self.height / 2.0);
        // Alternate the serve direction
        let direction = if self.misses % 2 == 0 { 1.0 } else { -1.0 };
        self.velocity = Vec2::new(BALL_SPEED.x * direction, BALL_SPEED.y);
    }

    /// Advance the ball; returns true when the paddle missed it
    pub fn step_ball(&mut self, delta_time: f64) -> bool {
        self.ball = self.ball + self.velocity.scaled(delta_time);

        if self.ball.x <= 0.0 || self.ball.x >= self.width {
            self.ball.x = self.ball.x.clamp(0.0, self.width);
            self.velocity.x = -self.velocity.x;
        }
        if self.ball.y <= 0.0 {
            self.ball.y = 0.0;
            self.velocity.y = self.velocity.y.abs();
        }

        if self.ball.y < self.height {
            return false;
        }

        let half = self.paddle_width / 2.0;
        if (self.ball.x - self.paddle_x).abs() <= half {
            self.ball.y = self.height;
            self.velocity.y = -self.velocity.y.abs();
            self.bounces += 1;
            false
        } else {
            self.misses += 1;
            self.serve();
            true
        }
    }

    /// Move the paddle toward the ball, at most `PADDLE_SPEED` per second
    pub fn track(&mut self, delta_time: f64) {
        let step = PADDLE_SPEED * delta_time;
        let offset = (self.ball.x - self.paddle_x).clamp(-step, step);
        let half = self.paddle_width / 2.0;
        self.paddle_x = (self.paddle_x + offset).clamp(half, self.width - half);
    }
}

impl Default for Playfield {
    fn default() -> Self {
        Self::new(800.0, 600.0)
    }
}

static PLAYFIELD: Mutex<Option<Playfield>> = parking_lot::const_mutex(None);

fn with_playfield<R>(f: impl FnOnce(&mut Playfield) -> R) -> R {
    let mut guard = PLAYFIELD.lock();
    f(guard.get_or_insert_with(Playfield::default))
}

/// Current playfield state
pub fn playfield() -> Playfield {
    with_playfield(|field| field.clone())
}

#[derive(Default)]
pub struct PaddleController {
    entity: EntityId,
}

impl ScriptableBehavior for PaddleController {
    fn on_create(&mut self, entity: EntityId) {
        self.entity = entity;
        log::debug!("Paddle controller attached to {}", entity);
    }

    fn on_update(&mut self, delta_time: f32) {
        with_playfield(|field| field.track(f64::from(delta_time)));
    }

    fn on_destroy(&mut self) {
        log::debug!("Paddle controller detached from {}", self.entity);
    }
}

#[derive(Default)]
pub struct BallController;

impl ScriptableBehavior for BallController {
    fn on_update(&mut self, delta_time: f32) {
        let (missed, misses) =
            with_playfield(|field| (field.step_ball(f64::from(delta_time)), field.misses));
        if missed {
            log::info!("Missed! {} of {}", misses, MAX_MISSES);
        }
    }
}

/// Ends the game after too many misses
pub struct PaddleApplication {
    name: String,
    frames: u64,
}

impl RuntimeApplication for PaddleApplication {
    fn on_init(&mut self) {
        log::info!("{} started", self.name);
    }

    fn on_update(&mut self, _delta_time: f32) -> bool {
        self.frames += 1;
        with_playfield(|field| field.misses < MAX_MISSES)
    }

    fn on_shutdown(&mut self) {
        let field = playfield();
        log::info!(
            "{} over after {} frames: {} bounces, {} misses",
            self.name,
            self.frames,
            field.bounces,
            field.misses
        );
    }
}

#[derive(Default)]
pub struct PaddleGame;

impl GameModule for PaddleGame {
    fn on_load(&mut self) -> Result<(), SdkError> {
        // The host's logger is not shared across the library boundary
        let _ = env_logger::try_init();
        *PLAYFIELD.lock() = Some(Playfield::default());
        log::info!("Paddle module loaded");
        Ok(())
    }

    fn on_unload(&mut self) {
        log::info!("Paddle module unloaded");
    }

    fn register_scripts(&mut self, registrar: &mut ScriptRegistrar<'_>) -> Result<(), SdkError> {
        registrar.register::<PaddleController>("PaddleController")?;
        registrar.register::<BallController>("BallController")
    }

    fn version(&self) -> u32 {
        1
    }

    fn create_runtime_application(
        &mut self,
        spec: &ApplicationSpec,
    ) -> Option<Box<dyn RuntimeApplication>> {
        with_playfield(|field| {
            *field = Playfield::new(f64::from(spec.window_width), f64::from(spec.window_height));
        });
        Some(Box::new(PaddleApplication {
            name: spec.name.clone(),
            frames: 0,
        }))
    }
}

luden_native::export_game_module!(PaddleGame);
