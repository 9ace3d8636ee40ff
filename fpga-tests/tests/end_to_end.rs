use std::{net::SocketAddr, time::Duration};

use fpga_client::{
    Builder, CapabilityMap, Client, ClientError, Notification, RegisterAccess, TcpTransport,
    faout::{self, Faout, FaoutRegisters},
};
use fpga_protocol::{Event, Request};
use fpga_tests::FakeServer;

fn connect(addr: SocketAddr) -> Client<TcpTransport> {
    let mut capabilities = CapabilityMap::new();
    capabilities.register(faout::PREFIX, Faout::factory);
    Builder::new()
        .read_timeout(Duration::from_secs(2))
        .capabilities(capabilities)
        .connect(addr)
        .expect("connecting to the fake server")
}

fn read_reg(serial: &str, addr: u8, port: u8) -> Request {
    Request::ReadReg {
        serial: serial.to_string(),
        addr,
        port,
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn lists_devices_on_connect() {
    let (addr, server) = FakeServer::new()
        .device("FAOUT-01")
        .device("DIGI-01")
        .spawn()
        .await
        .unwrap();

    tokio::task::spawn_blocking(move || {
        let mut client = connect(addr);
        assert_eq!(client.devices(), vec!["DIGI-01", "FAOUT-01"]);
        assert_eq!(
            client.device("FAOUT-01").unwrap().capability_name(),
            Some("FAOUT")
        );
        assert_eq!(client.device("DIGI-01").unwrap().capability_name(), None);
        assert_eq!(client.take_notifications().len(), 2);
    })
    .await
    .unwrap();

    assert_eq!(server.await.unwrap().unwrap(), vec![Request::DeviceList]);
}

#[tokio::test(flavor = "multi_thread")]
async fn register_access() {
    let (addr, server) = FakeServer::new()
        .register("FAOUT-01", 0, 1, 42)
        .reject_writes("FAOUT-01", 0, 1, "bad address")
        .spawn()
        .await
        .unwrap();

    tokio::task::spawn_blocking(move || {
        let mut client = connect(addr);
        assert_eq!(client.read_reg("FAOUT-01", 0, 1).unwrap(), 42);

        let err = client.write_reg("FAOUT-01", 0, 1, 99).unwrap_err();
        assert!(err.to_string().contains("bad address"));
        assert!(!client.is_closed());

        client.write_reg("FAOUT-01", 2, 3, 0x1234).unwrap();
        assert_eq!(client.read_reg("FAOUT-01", 2, 3).unwrap(), 0x1234);

        match client.read_reg("NOPE-1", 0, 0) {
            Err(ClientError::Server { message, .. }) => assert_eq!(message, "Unknown device"),
            other => panic!("expected a server error, got {:?}", other),
        }
    })
    .await
    .unwrap();

    let requests = server.await.unwrap().unwrap();
    assert_eq!(requests.len(), 6);
    assert_eq!(requests[1], read_reg("FAOUT-01", 0, 1));
}

#[tokio::test(flavor = "multi_thread")]
async fn register_blocks_and_raw_data() {
    let (addr, server) = FakeServer::new().device("FAOUT-01").spawn().await.unwrap();

    tokio::task::spawn_blocking(move || {
        let mut client = connect(addr);
        client.write_reg_n("FAOUT-01", 1, 4, &[1, 2, 3]).unwrap();
        assert_eq!(client.read_reg_n("FAOUT-01", 1, 4, 3).unwrap(), vec![1, 2, 3]);

        client.write_raw("FAOUT-01", b"hello").unwrap();
        assert_eq!(client.read_raw("FAOUT-01", 5).unwrap(), b"hello".to_vec());

        // Nothing left on the server.
        assert!(matches!(
            client.read_reg_n("FAOUT-01", 1, 4, 1),
            Err(ClientError::LengthMismatch {
                expected: 2,
                got: 0
            })
        ));
        assert!(client.reprogram_device("FAOUT-01").unwrap());
    })
    .await
    .unwrap();

    server.await.unwrap().unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn events_between_answers() {
    let (addr, server) = FakeServer::new()
        .register("FAOUT-01", 0, 1, 7)
        .event_before_answer(
            1,
            Event::RegisterChanged {
                serial: "FAOUT-01".to_string(),
                addr: 0,
                port: 1,
                value: 1 << 3,
            },
        )
        .event_before_answer(
            1,
            Event::DeviceAdded {
                serial: "FAOUT-02".to_string(),
            },
        )
        .event_before_answer(
            2,
            Event::DeviceAdded {
                serial: "FAOUT-02".to_string(),
            },
        )
        .spawn()
        .await
        .unwrap();

    tokio::task::spawn_blocking(move || {
        let mut client = connect(addr);
        client.take_notifications();

        assert_eq!(client.read_reg("FAOUT-01", 0, 1).unwrap(), 7);
        assert_eq!(
            client.take_notifications(),
            vec![
                Notification::RegisterChanged {
                    serial: "FAOUT-01".to_string(),
                    addr: 0,
                    port: 1,
                    value: 1 << 3,
                },
                Notification::DeviceAdded {
                    serial: "FAOUT-02".to_string(),
                    capability: Some("FAOUT".to_string()),
                },
            ]
        );
        let status = client
            .device("FAOUT-01")
            .and_then(|device| device.capability::<Faout>())
            .and_then(Faout::last_status)
            .unwrap();
        assert!(status.running);

        // Added again and listed: no second notification.
        client.get_device_list().unwrap();
        assert_eq!(client.devices(), vec!["FAOUT-01", "FAOUT-02"]);
        assert!(client.take_notifications().is_empty());
    })
    .await
    .unwrap();

    server.await.unwrap().unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn faout_operations_on_a_handle() {
    let (addr, server) = FakeServer::new()
        .register("FAOUT-01", 0, 3, 0x0102)
        .register("FAOUT-01", 0, 2, 0b100)
        .register("FAOUT-01", 1, 2, 3)
        .spawn()
        .await
        .unwrap();

    tokio::task::spawn_blocking(move || {
        let mut client = connect(addr);
        let mut device = client.device_mut("FAOUT-01").unwrap();
        assert!(device.capability::<Faout>().is_some());

        assert_eq!(device.version().unwrap(), 0x0102);
        device.set_clock_extern(true).unwrap();
        assert_eq!(device.read_reg(0, 2).unwrap(), 0b101);
        assert!(device.clock_extern().unwrap());

        device.write_dac(3, 0x8000).unwrap();
        assert_eq!(device.read_dac(3).unwrap(), 0x8000);
        device.write_interp(1, 500, 20).unwrap();
        assert_eq!(device.read_interp(1).unwrap(), (500, 20));

        assert_eq!(device.sdram_pointers().unwrap(), (0, 3));
        device.sdram_write(&[10, 20, 30]).unwrap();
        assert_eq!(device.sdram_read(None).unwrap(), vec![10, 20, 30]);

        device.reset().unwrap();
        assert_eq!(device.read_reg(0, 0).unwrap(), 1);
    })
    .await
    .unwrap();

    server.await.unwrap().unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn connection_loss_removes_devices() {
    let (addr, server) = FakeServer::new()
        .device("FAOUT-01")
        .device("FAOUT-02")
        .close_before_answer(1)
        .spawn()
        .await
        .unwrap();

    tokio::task::spawn_blocking(move || {
        let mut client = connect(addr);
        client.take_notifications();

        let err = client.read_reg("FAOUT-01", 0, 1).unwrap_err();
        assert!(err.is_fatal(), "{:?}", err);
        assert!(client.is_closed());
        assert!(client.devices().is_empty());
        assert_eq!(
            client.take_notifications(),
            vec![
                Notification::DeviceRemoved {
                    serial: "FAOUT-01".to_string()
                },
                Notification::DeviceRemoved {
                    serial: "FAOUT-02".to_string()
                },
            ]
        );
        assert!(matches!(
            client.read_reg("FAOUT-01", 0, 1),
            Err(ClientError::Closed)
        ));
    })
    .await
    .unwrap();

    assert_eq!(server.await.unwrap().unwrap().len(), 2);
}

#[tokio::test(flavor = "multi_thread")]
async fn malformed_stream_is_fatal() {
    let (addr, server) = FakeServer::new()
        .device("FAOUT-01")
        .garbage_before_answer(1, &[0xc1])
        .spawn()
        .await
        .unwrap();

    tokio::task::spawn_blocking(move || {
        let mut client = connect(addr);
        assert!(matches!(
            client.read_reg("FAOUT-01", 0, 1),
            Err(ClientError::Protocol(_))
        ));
        assert!(client.is_closed());
    })
    .await
    .unwrap();

    // The client hangs up with the answer still unread, so the server may see a reset.
    let _ = server.await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn polling_tolerates_silence() {
    let (addr, server) = FakeServer::new().device("FAOUT-01").spawn().await.unwrap();

    tokio::task::spawn_blocking(move || {
        let mut client = Builder::new()
            .read_timeout(Duration::from_millis(50))
            .capabilities(CapabilityMap::new())
            .connect(addr)
            .unwrap();
        client.take_notifications();

        assert!(client.poll_events().unwrap().is_empty());
        assert!(!client.is_closed());
        assert_eq!(client.read_reg("FAOUT-01", 0, 0).unwrap(), 0);
    })
    .await
    .unwrap();

    server.await.unwrap().unwrap();
}
