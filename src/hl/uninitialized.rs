use core::num::Wrapping;

use crate::{
    configs::Config,
    hl::DeviceInfo,
    ll::{self, bits, RegisterBus},
    time::Instant,
    Error, Ready, Uninitialized, DW1000,
};

impl<B> DW1000<B, Uninitialized>
where
    B: RegisterBus,
{
    /// Create a new instance of `DW1000`
    ///
    /// Requires the register bus the DW1000 is connected to. Nothing is sent
    /// to the device until [`DW1000::init`] is called.
    pub fn new(bus: B) -> Self {
        DW1000 {
            ll: ll::DW1000::new(bus),
            seq: Wrapping(0),
            info: DeviceInfo::default(),
            state: Uninitialized,
        }
    }

    /// Initialize the DW1000
    ///
    /// Resets the device, checks that it answers with the DW1000 device id,
    /// applies the PHY setup from `config` and switches the bus to its
    /// operating speed.
    ///
    /// On failure the uninitialized handle is returned along with the error,
    /// so initialization can be retried or the bus released.
    pub async fn init(
        mut self,
        config: &Config,
    ) -> Result<DW1000<B, Ready>, (Self, Error<B::Error>)> {
        match self.bring_up(config).await {
            Ok(info) => {
                info!(
                    "dw1000: initialized, device id {:#x}, pan {:#x}, addr {:#x}",
                    info.device_id,
                    info.pan_id,
                    info.short_addr
                );
                Ok(DW1000 {
                    ll: self.ll,
                    seq: self.seq,
                    info,
                    state: Ready,
                })
            }
            Err(error) => {
                error!("dw1000: initialization failed");
                Err((self, error))
            }
        }
    }

    /// Give back the register bus
    pub fn release(self) -> B {
        self.ll.release()
    }

    async fn bring_up(&mut self, config: &Config) -> Result<DeviceInfo, Error<B::Error>> {
        let bus = self.ll.bus();
        bus.reset().await.map_err(ll::Error::Bus)?;
        bus.configure(config.baudrate_low)
            .await
            .map_err(ll::Error::Bus)?;

        let device_id = self.ll.dev_id().read().await? as u32;
        if device_id != bits::DEVICE_ID {
            self.ll.bus().disable();
            return Err(Error::InitializationFault { device_id });
        }

        let timestamp = Instant::new(self.ll.sys_time().read().await?);

        for write in config.phy {
            self.ll
                .write_reg(write.id, write.sub_id, write.value, write.len)
                .await?;
        }

        let panadr = (config.pan_id as u64) << 16 | config.short_addr as u64;
        self.ll.panadr().write(panadr).await?;

        self.ll
            .bus()
            .configure(config.baudrate_high)
            .await
            .map_err(ll::Error::Bus)?;

        Ok(DeviceInfo {
            device_id,
            timestamp,
            pan_id: config.pan_id,
            short_addr: config.short_addr,
        })
    }
}
