use super::{CONSOLE, RELAY, USB_STORAGE};
use crate::line::{FRAME_SIZE, Frame};
use crate::port::SerialPort;
use crate::usb::{self, CdcAcmHandle, UsbDeviceStrings, UsbPortKind};
use embassy_futures::join::join3;
use embassy_futures::select::{Either3, select3};
use embassy_stm32 as hal;
use embassy_stm32::Peri;
use embassy_usb::driver::EndpointError;

embassy_stm32::bind_interrupts!(struct UsbIrqs {
    USB_UCPD1_2 => embassy_stm32::usb::InterruptHandler<hal::peripherals::USB>;
});

#[embassy_executor::task]
pub async fn run(
    usb: Peri<'static, hal::peripherals::USB>,
    dp: Peri<'static, hal::peripherals::PA12>,
    dm: Peri<'static, hal::peripherals::PA11>,
) -> ! {
    let storage = USB_STORAGE.init(usb::UsbDeviceStorage::new());
    let driver = embassy_stm32::usb::Driver::new(usb, UsbIrqs, dp, dm);

    let mut composite = usb::UsbComposite::new(driver, storage, UsbDeviceStrings::default());
    let console = composite.take_port(UsbPortKind::Console);
    let relay = composite.take_port(UsbPortKind::Relay);
    let mut device = composite.device;

    match (console, relay) {
        (Some(console), Some(relay)) => {
            join3(
                device.run(),
                run_interface(console, &CONSOLE),
                run_interface(relay, &RELAY),
            )
            .await;
        }
        _ => defmt::error!("usb: CDC interfaces unavailable"),
    }

    loop {
        core::future::pending::<()>().await;
    }
}

/// Shuttles packets between one CDC interface and its [`SerialPort`].
async fn run_interface<D>(mut handle: CdcAcmHandle<D>, port: &'static SerialPort) -> !
where
    D: embassy_usb::driver::Driver<'static>,
{
    let label = handle.kind().label();
    let mut ingress = [0u8; FRAME_SIZE];

    loop {
        handle.wait_ready().await;
        wait_for_dtr(&mut handle).await;
        let mut pending_tx: Option<Frame> = None;
        port.discard_output();
        port.set_connected(true);

        defmt::info!("usb: {} interface connected", label);

        loop {
            let CdcAcmHandle {
                sender,
                receiver,
                control,
                ..
            } = &mut handle;

            match select3(
                receiver.read_packet(&mut ingress),
                async {
                    let frame = match pending_tx.take() {
                        Some(frame) => frame,
                        None => port.tx.receive().await,
                    };
                    match sender.write_packet(&frame).await {
                        Ok(()) => Ok(frame.len()),
                        Err(err) => {
                            pending_tx = Some(frame);
                            Err(err)
                        }
                    }
                },
                control.control_changed(),
            )
            .await
            {
                Either3::First(Ok(0)) | Either3::Second(Ok(_)) => {}
                Either3::First(Ok(count)) => {
                    let delivered = Frame::from_slice(&ingress[..count])
                        .is_ok_and(|frame| port.rx.try_send(frame).is_ok());
                    if !delivered {
                        defmt::warn!("usb: dropping {} frame len={}", label, count);
                    }
                }
                Either3::First(Err(EndpointError::Disabled))
                | Either3::Second(Err(EndpointError::Disabled)) => {
                    defmt::warn!("usb: {} interface disabled", label);
                    break;
                }
                Either3::First(Err(_)) => defmt::warn!("usb: {} read error", label),
                Either3::Second(Err(_)) => defmt::warn!("usb: {} write error", label),
                Either3::Third(()) => {
                    if !sender.dtr() {
                        defmt::warn!("usb: {} host dropped DTR", label);
                        break;
                    }
                }
            }
        }

        port.set_connected(false);
    }
}

async fn wait_for_dtr<D>(handle: &mut CdcAcmHandle<D>)
where
    D: embassy_usb::driver::Driver<'static>,
{
    while !handle.dtr() {
        handle.control.control_changed().await;
    }
}
