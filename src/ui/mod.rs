mod confirm;
mod interrupt;
mod output;

pub use confirm::TerminalConfirm;
pub use interrupt::{Interrupted, TurnInterrupts};
pub use output::{
    print_error, print_session_list, print_tools, render_event, render_turn, truncate_for_display,
};
