use cortex_m::interrupt;
use cortex_m::register::primask;
use critical_section::{self, RawRestoreState};
use defmt_rtt as _;
use embassy_executor::Spawner;
use embassy_stm32 as hal;
use embassy_stm32::gpio::{Input, Level, Output, Pull, Speed};
use embassy_sync::channel::Channel;
use static_cell::StaticCell;
use vending_core::controller::{TerminalConfig, TerminalController};
use vending_core::gesture::GestureConfig;
use vending_core::session::SessionConfig;

use crate::hw::{self, Button, PanelSink, SolenoidActuator};
use crate::link::LinkGateway;
use crate::port::{CueChannel, SerialPort};
use crate::usb;

mod feedback_task;
mod terminal_task;
mod usb_task;

critical_section::set_impl!(InterruptCriticalSection);

struct InterruptCriticalSection;

unsafe impl critical_section::Impl for InterruptCriticalSection {
    unsafe fn acquire() -> RawRestoreState {
        let primask = primask::read();
        interrupt::disable();
        primask.is_active()
    }

    unsafe fn release(restore_state: RawRestoreState) {
        if restore_state {
            unsafe {
                interrupt::enable();
            }
        }
    }
}

/// CDC0: operator console.
pub(super) static CONSOLE: SerialPort = SerialPort::new();
/// CDC1: payment relay link.
pub(super) static RELAY: SerialPort = SerialPort::new();
pub(super) static CUES: CueChannel = Channel::new();
pub(super) static USB_STORAGE: StaticCell<usb::UsbDeviceStorage> = StaticCell::new();

#[embassy_executor::main]
pub async fn main(spawner: Spawner) {
    let config = hal::Config::default();
    let hal::Peripherals {
        PA0,
        PA5,
        PB4,
        PB5,
        PB6,
        USB,
        PA11,
        PA12,
        ..
    } = hal::init(config);

    let button = Button::new(Input::new(PA0, Pull::Up));
    let actuator = SolenoidActuator::new(
        Output::new(PB4, Level::Low, Speed::Low),
        Input::new(PB5, Pull::Up),
    );
    let panel = PanelSink::new(CUES.sender(), &CONSOLE);
    let gateway = LinkGateway::new(&RELAY);
    let config = TerminalConfig::new()
        .with_session(SessionConfig::new().with_description(hw::PRODUCT_DESCRIPTION))
        .with_gesture(GestureConfig::new().with_debounce(hw::BUTTON_DEBOUNCE));
    let terminal = TerminalController::new(button, gateway, panel, actuator, config);

    spawner
        .spawn(usb_task::run(USB, PA12, PA11))
        .expect("failed to spawn USB task");
    spawner
        .spawn(feedback_task::run(
            CUES.receiver(),
            Output::new(PB6, Level::Low, Speed::Low),
            Output::new(PA5, Level::Low, Speed::Low),
        ))
        .expect("failed to spawn feedback task");
    spawner
        .spawn(terminal_task::run(terminal, &CONSOLE))
        .expect("failed to spawn terminal task");

    core::future::pending::<()>().await;
}
