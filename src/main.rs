// SPDX-FileCopyrightText: OpenTalk GmbH <mail@opentalk.eu>
//
// SPDX-License-Identifier: EUPL-1.2

#![allow(clippy::module_name_repetitions)]

use anyhow::{Context, Result};
use livemix::{session::Session, settings::Settings};
use log::{error, info, warn};
use tokio::{
    select,
    signal::{
        ctrl_c,
        unix::{signal, SignalKind},
    },
    sync::watch::{self, Receiver},
};

const CONFIG_FILE: &str = "config.toml";

fn main() -> Result<()> {
    env_logger::init();

    if std::env::var(compositor::debug::DOT_DIR_ENV).is_err() {
        warn!(
            "{} is not set, no DOT output will be written",
            compositor::debug::DOT_DIR_ENV
        );
    }

    let (shutdown_tx, shutdown_rx) = watch::channel::<bool>(false);
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to start tokio async runtime")?;

    runtime.spawn(async move {
        let mut sig_term = match signal(SignalKind::terminate()) {
            Ok(sig_term) => sig_term,
            Err(e) => {
                error!("can not setup SIGTERM handler: {e}");
                return;
            }
        };
        select! {
            _ = ctrl_c() => { info!("received Ctrl-C"); }
            _ = sig_term.recv() => { info!("received SIGTERM"); }
        }
        if shutdown_tx.send(true).is_err() {
            warn!("session already finished");
        }
    });

    if let Err(e) = runtime.block_on(main2(shutdown_rx)) {
        eprintln!("Exit on failure: {e:?}");
        std::process::exit(-1);
    }

    Ok(())
}

async fn main2(shutdown_rx: Receiver<bool>) -> Result<()> {
    let file_name = std::env::args().nth(1).unwrap_or_else(|| CONFIG_FILE.into());
    let settings = Settings::load(&file_name).context("Failed to read config")?;

    let session = Session::create(&settings).context("session failed to start")?;
    session.run(shutdown_rx).await
}
