//! Pixel demo application
//!
//! Opens a window, fills it with a color gradient and paints a trail under
//! the mouse cursor. Press Escape or close the window to quit.

use pixel_engine::prelude::*;
use pixel_engine::render::color;
use std::cell::Cell;
use std::rc::Rc;
use thiserror::Error;

const WIDTH: u32 = 320;
const HEIGHT: u32 = 240;
const CONFIG_PATH: &str = "pixel_demo.toml";

#[derive(Error, Debug)]
enum DemoError {
    #[error(transparent)]
    App(#[from] AppError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

#[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
fn draw_gradient(app: &mut Application, window: WindowId) -> Result<(), DemoError> {
    for y in 0..HEIGHT {
        for x in 0..WIDTH {
            let r = (x * 255 / WIDTH) as u8;
            let g = (y * 255 / HEIGHT) as u8;
            app.pixel_put(window, x as i32, y as i32, color::rgb(r, g, 96))?;
        }
    }
    Ok(())
}

fn main() -> Result<(), DemoError> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = AppConfig::load_or_else(CONFIG_PATH, || AppConfig::new("Pixel Demo"))?;
    let mut app = Application::new(config)?;
    log::info!("Starting pixel demo");

    let window = app.new_window(WIDTH, HEIGHT, "Pixel Demo")?;
    draw_gradient(&mut app, window)?;

    let frames = Rc::new(Cell::new(0u64));
    let counter = Rc::clone(&frames);
    app.loop_hook(move |app| {
        counter.set(counter.get() + 1);

        let (mut x, mut y) = (0, 0);
        if app.mouse_pos_status(window, &mut x, &mut y) != 0 {
            return -1;
        }
        // Out-of-window positions are ignored by pixel_put
        for (dx, dy) in [(0, 0), (1, 0), (0, 1), (1, 1)] {
            if app.pixel_put(window, x + dx, y + dy, color::rgb(255, 255, 255)).is_err() {
                return -1;
            }
        }
        0
    });

    app.run()?;
    log::info!("Pixel demo finished after {} frames", frames.get());
    app.shutdown();
    Ok(())
}
