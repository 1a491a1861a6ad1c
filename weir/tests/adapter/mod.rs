mod finished;
mod sink;
mod stream;
