// SPDX-FileCopyrightText: OpenTalk GmbH <mail@opentalk.eu>
//
// SPDX-License-Identifier: EUPL-1.2

mod bridge;
mod feedback;
pub mod rtp;
mod test_source;

pub use bridge::*;
pub use feedback::*;
pub use rtp::RtpHeader;
pub use test_source::*;
