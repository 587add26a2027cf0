// SPDX-FileCopyrightText: OpenTalk GmbH <mail@opentalk.eu>
//
// SPDX-License-Identifier: EUPL-1.2

mod collect;
mod fake;
mod manifest;

pub use collect::*;
pub use fake::*;
pub use manifest::*;
