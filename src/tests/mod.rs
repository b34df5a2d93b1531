mod http_clients;
mod web;
