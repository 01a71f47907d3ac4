#![cfg_attr(not(debug_assertions), windows_subsystem = "windows")]

mod capture;
mod config;
mod model_download;
mod overlay;
mod pipeline;
mod placement;
mod types;
mod ui;

#[cfg(test)]
mod test_utils;

use std::sync::Arc;

use anyhow::Result;
use gpui::Application;

use config::AppConfig;

fn main() -> Result<()> {
    env_logger::init();

    let config = Arc::new(AppConfig::load()?);

    Application::new()
        .with_assets(gpui_component_assets::Assets)
        .run(move |app| {
            gpui_component::init(app);

            if let Err(err) = ui::launch_ui(app, config.clone()) {
                log::error!("failed to launch ui: {err:?}");
            }
        });

    Ok(())
}
