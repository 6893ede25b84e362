pub mod batch_writer;
pub mod change_notifier;

pub use batch_writer::BatchWriter;
pub use change_notifier::ChangeNotifier;
