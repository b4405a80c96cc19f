#![allow(dead_code)]

use std::time::Duration;

use sshwrap::{Client, ConnectOptions, KnownHosts};
use testcontainers::{core::ContainerPort, runners::AsyncRunner, ContainerAsync, GenericImage};
use uuid::Uuid;

pub fn get_tmp_path() -> String {
    format!("/tmp/{}", Uuid::new_v4())
}

pub struct TestData {
    pub client: Client,
    pub ssh_port: u16,
    _container: ContainerAsync<GenericImage>,
}

impl TestData {
    pub async fn setup() -> TestData {
        let container = GenericImage::new("ssh_server", "latest")
            .with_exposed_port(ContainerPort::Tcp(22))
            .start()
            .await
            .expect("Could not start SSH container");
        let ports = container
            .ports()
            .await
            .expect("Could not get SSH container ports");
        let ssh_port = ports
            .map_to_host_port_ipv4(ContainerPort::Tcp(22))
            .expect("Could not get SSH container port corresponding to 22");
        tokio::time::sleep(Duration::from_millis(100)).await;

        let client = Client::connect(options(ssh_port))
            .await
            .expect("Could not connect");

        TestData {
            client,
            ssh_port,
            _container: container,
        }
    }

    pub async fn init_file(&self, content: &str) -> String {
        let path = get_tmp_path();
        self.client.sftp().create(path.as_str()).await.unwrap();
        self.client
            .sftp()
            .write(path.as_str(), content.as_bytes())
            .await
            .unwrap();
        path
    }

    pub async fn init_dir(&self) -> String {
        let path = get_tmp_path();
        self.client
            .sftp()
            .create_dir(path.as_str())
            .await
            .expect("Could not create dir");
        path
    }

    pub async fn assert_file(&self, path: &str, expected_content: &str) {
        let actual_content = String::from_utf8(self.client.sftp().read(path).await.unwrap()).unwrap();
        assert_eq!(actual_content, expected_content);
    }
}

pub fn options(ssh_port: u16) -> ConnectOptions {
    ConnectOptions::new("localhost", "root", "root123")
        .port(ssh_port)
        .known_hosts(KnownHosts::new())
        .timeout(Duration::from_secs(10))
}
