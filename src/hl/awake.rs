use embedded_hal_async::delay::DelayNs;

use super::Awake;
use crate::{
    ll::{self, bits, RegisterBus},
    time::Instant,
    Error, DW1000,
};

impl<B, State> DW1000<B, State>
where
    B: RegisterBus,
    State: Awake,
{
    /// Returns the current system time
    pub async fn sys_time(&mut self) -> Result<Instant, Error<B::Error>> {
        let value = self.ll.sys_time().read().await?;

        Ok(Instant::wrapping(value))
    }

    /// Soft-reset the digital blocks of the DW1000
    ///
    /// Switches the system clock to the crystal, stops the packet sequencer,
    /// clears the always-on configuration so the reset doesn't reload it,
    /// then pulses the PMSC soft reset bits. Register contents outside the
    /// always-on block return to their defaults.
    pub async fn soft_reset<D: DelayNs>(&mut self, delay: &mut D) -> Result<(), Error<B::Error>> {
        self.ll
            .pmsc_ctrl0()
            .modify(|v| (v & !bits::PMSC_CTRL0_SYSCLKS_MASK) | bits::PMSC_CTRL0_SYSCLKS_19M)
            .await?;
        self.ll
            .pmsc_ctrl1()
            .write(bits::PMSC_CTRL1_PKTSEQ_DISABLE)
            .await?;

        self.ll.aon_wcfg().write(0).await?;
        self.ll.aon_cfg0().write(0).await?;
        self.ll.aon_ctrl().write(0).await?;
        self.ll.aon_ctrl().write(bits::AON_CTRL_SAVE).await?;

        self.ll.pmsc_softreset().write(bits::PMSC_RESET_ALL).await?;
        // The PLL needs 10 us to lock again.
        delay.delay_us(10).await;
        self.ll.pmsc_softreset().write(bits::PMSC_RESET_CLEAR).await?;

        debug!("dw1000: soft reset done");
        Ok(())
    }

    /// Provides direct access to the register-level API
    ///
    /// Be aware that by using the register-level API, you can invalidate
    /// various assumptions that the high-level API makes about the operation of
    /// the DW1000. Don't use the register-level and high-level APIs in tandem,
    /// unless you know what you're doing.
    pub fn ll(&mut self) -> &mut ll::DW1000<B> {
        &mut self.ll
    }
}
