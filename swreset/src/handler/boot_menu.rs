//! Boot-loader menu, the last-resort entry point.
//!
//! Reaching the menu only hands the device to the operator: the image
//! transfer from the menu is done out of band and acknowledged through the
//! [`Operator`].

use std::time::Instant;

use log::{info, warn};

use super::Session;
use crate::error::Result;
use crate::operator::{Operator, PowerCycleTarget};
use crate::outcome::RunContext;
use crate::pattern::Signal;
use crate::port::Port;
use crate::step;

/// Boot-menu handler.
#[derive(Debug, Default, Clone, Copy)]
pub struct BootMenuHandler;

impl BootMenuHandler {
    /// Catch the boot window, send the menu key and wait for the operator
    /// to finish the manual transfer. `Ok(true)` once they confirm.
    pub fn enter_and_hand_off<P: Port>(
        &self,
        session: &mut Session<'_, P>,
        operator: &mut dyn Operator,
        ctx: &mut RunContext,
    ) -> Result<bool> {
        step!("Falling back to the boot configuration menu");
        let timeouts = session.timeouts();
        let keys = session
            .profile()
            .boot_menu_bytes()?;

        operator.request_power_cycle(PowerCycleTarget::BootMenu)?;
        let deadline = Instant::now() + timeouts.boot_menu_wait;

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            let (boot, _) = session.wait_for(&[Signal::BootIndicators], remaining)?;
            if boot.is_none() {
                break;
            }
            ctx.mark_interaction_start();

            session.write(&keys)?;
            session.settle(timeouts.pacing.settle_short);
            let (menu, _) = session.wait_for(
                &[Signal::BootMenuIndicators],
                timeouts.boot_menu_console_wait,
            )?;
            if menu.is_some() {
                info!("Boot configuration menu reached");
                let confirmed = operator.await_manual_transfer()?;
                if !confirmed {
                    ctx.warn("Operator did not confirm the manual image transfer");
                }
                return Ok(confirmed);
            }
            warn!("Boot menu did not appear, waiting for the next boot indicator");
        }

        ctx.warn(format!(
            "Boot menu not reached within {:?}",
            timeouts.boot_menu_wait
        ));
        Ok(false)
    }
}
