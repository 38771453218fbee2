mod frame_lock;
mod runner;
mod tuner;
mod watcher;
