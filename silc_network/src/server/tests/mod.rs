
mod command_reply;
mod id_propagation;
mod notify;
