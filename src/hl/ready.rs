use crate::{
    hl::DeviceInfo,
    ll::{bits, RegisterBus},
    Error, Ready, Uninitialized, DW1000,
};

impl<B> DW1000<B, Ready>
where
    B: RegisterBus,
{
    /// Identity and address information gathered during initialization
    pub fn info(&self) -> DeviceInfo {
        self.info
    }

    /// Sets the network id and address used for sending and receiving
    pub async fn set_address(&mut self, pan_id: u16, short_addr: u16) -> Result<(), Error<B::Error>> {
        self.ll
            .panadr()
            .write((pan_id as u64) << 16 | short_addr as u64)
            .await?;
        self.info.pan_id = pan_id;
        self.info.short_addr = short_addr;

        Ok(())
    }

    /// Unmask the system events the transaction engine consumes
    ///
    /// Events outside [`bits::ENGINE_EVENTS`] keep their current mask bit.
    pub async fn enable_interrupts(&mut self) -> Result<(), Error<B::Error>> {
        self.ll
            .sys_mask()
            .modify(|v| v | bits::ENGINE_EVENTS)
            .await?;
        Ok(())
    }

    /// Mask every system event
    pub async fn disable_interrupts(&mut self) -> Result<(), Error<B::Error>> {
        self.ll.sys_mask().write(0).await?;
        Ok(())
    }

    /// Shut the device down and disable its bus
    ///
    /// The returned handle has to go through [`DW1000::init`] again before
    /// it can be used.
    pub fn free(mut self) -> DW1000<B, Uninitialized> {
        self.ll.bus().disable();
        debug!("dw1000: freed");

        DW1000 {
            ll: self.ll,
            seq: self.seq,
            info: DeviceInfo::default(),
            state: Uninitialized,
        }
    }
}
