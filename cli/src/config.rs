use std::{
    fs,
    path::{Path, PathBuf},
};

use color_eyre::{
    Result,
    eyre::{WrapErr as _, eyre},
};
use creator::Options;
use log::debug;
use serde::de::DeserializeOwned;

use crate::cli::Cli;

pub fn config_path() -> Result<PathBuf> {
    Ok(dirs::config_local_dir()
        .ok_or(eyre!("Couldn't get config dir"))?
        .join("bing_image_creator.ron"))
}

pub fn load_ron_file<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let src = fs::read_to_string(path)?;
    Ok(ron::from_str(&src)?)
}

/// Options from the config file, if there is one, with the command line
/// flags applied on top.
pub fn load_options(cli: &Cli) -> Result<Options> {
    let mut options = match &cli.config {
        Some(path) => load_ron_file(path).wrap_err_with(|| format!("Reading {}", path.display()))?,
        None => {
            let path = config_path()?;
            if path.exists() {
                load_ron_file(&path).wrap_err_with(|| format!("Reading {}", path.display()))?
            } else {
                debug!("No config at {}, using defaults", path.display());
                Options::default()
            }
        }
    };

    if let Some(token) = &cli.user_token {
        options.user_token = Some(token.clone());
    }
    if let Some(xff) = &cli.x_forwarded_for {
        options.x_forwarded_for = Some(xff.clone());
    }
    options.debug |= cli.debug;

    Ok(options)
}
